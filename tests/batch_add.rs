use epmodel::construct::Epm;
use epmodel::EpmError;

fn setup() -> Epm {
    Epm::new()
}

#[test]
fn batch_add_returns_the_new_records_in_input_order() {
    let epm = setup();
    let schedules = epm.table("Schedule:Compact").unwrap();
    let qs = schedules
        .batch_add(vec![
            vec![("name", "sch one".into())],
            vec![("name", "sch two".into())],
            vec![("name", "sch three".into())],
        ])
        .unwrap();
    assert_eq!(qs.len(), 3);
    let names: Vec<String> = qs.iter().map(|r| r.name().unwrap()).collect();
    assert_eq!(names, ["sch one", "sch two", "sch three"]);
    assert_eq!(schedules.len(), 3);
}

#[test]
fn batch_add_is_all_or_nothing() {
    let epm = setup();
    let zones = epm.table("Zone").unwrap();
    zones.add(vec![("name", "existing".into())]).unwrap();
    let err = zones
        .batch_add(vec![
            vec![("name", "one".into())],
            vec![("name", "two".into())],
            vec![("no_such_field", "x".into())],
        ])
        .unwrap_err();
    assert!(matches!(err, EpmError::UnknownField { .. }));
    // no partial insert
    assert_eq!(zones.len(), 1);
    assert_eq!(zones.get(0).unwrap().name().unwrap(), "existing");
}

#[test]
fn batch_add_chains_into_delete() {
    let epm = setup();
    let zones = epm.table("Zone").unwrap();
    zones.add(vec![("name", "keeper".into())]).unwrap();
    zones
        .batch_add(vec![
            vec![("name", "tmp one".into())],
            vec![("name", "tmp two".into())],
        ])
        .unwrap()
        .delete()
        .unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones.get(0).unwrap().name().unwrap(), "keeper");
}

#[test]
fn added_records_take_declared_defaults() {
    let epm = setup();
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "main zone".into())])
        .unwrap();
    assert_eq!(zone.get("type").unwrap(), 1.0);
    assert_eq!(zone.get("ceiling_height").unwrap(), "autocalculate");
    // an explicit value wins over the default
    let other = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "other".into()), ("multiplier", 4.0.into())])
        .unwrap();
    assert_eq!(other.get("multiplier").unwrap(), 4.0);
}
