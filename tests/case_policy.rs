use epmodel::construct::Epm;

fn setup() -> Epm {
    let _ = tracing_subscriber::fmt::try_init();
    Epm::new()
}

#[test]
fn non_retaining_field_is_lowercased_on_every_write_path() {
    let epm = setup();
    let zones = epm.table("Zone").unwrap();
    // direct add
    let zone = zones.add(vec![("name", "Main Zone".into())]).unwrap();
    assert_eq!(zone.get("name").unwrap(), "main zone");
    // set
    zone.set("name", "Other ZONE").unwrap();
    assert_eq!(zone.get("name").unwrap(), "other zone");
    // add_fields
    let schedules = epm.table("Schedule:Compact").unwrap();
    let schedule = schedules.add(vec![("name", "sch".into())]).unwrap();
    schedule
        .add_fields(vec!["Through: 12/31".into()])
        .unwrap();
    assert_eq!(schedule.get("field_1").unwrap(), "through: 12/31");
    // batch add
    let qs = zones
        .batch_add(vec![vec![("name", "Batch Zone".into())]])
        .unwrap();
    assert_eq!(qs.get(0).unwrap().get("name").unwrap(), "batch zone");
}

#[test]
fn retaining_field_keeps_caller_casing() {
    let epm = setup();
    let buildings = epm.table("Building").unwrap();
    let building = buildings.add(vec![("name", "Bldg".into())]).unwrap();
    assert_eq!(building.get("name").unwrap(), "Bldg");
    building.set("name", "MixedCase").unwrap();
    assert_eq!(building.get("name").unwrap(), "MixedCase");
}

#[test]
fn predicates_match_the_stored_form() {
    let epm = setup();
    let schedules = epm.table("Schedule:Compact").unwrap();
    schedules
        .add(vec![("name", "Heating Setpoint Schedule".into())])
        .unwrap();
    // the stored value is normalized, so the original casing finds nothing
    assert!(schedules
        .select(|x| x.get("name").unwrap() == "Heating Setpoint Schedule")
        .is_empty());
    assert_eq!(
        schedules
            .select(|x| x.get("name").unwrap() == "heating setpoint schedule")
            .len(),
        1
    );
    // a case-retaining field matches the exact original casing
    let buildings = epm.table("Building").unwrap();
    buildings.add(vec![("name", "Bldg".into())]).unwrap();
    assert!(buildings.select(|x| x.get("name").unwrap() == "bldg").is_empty());
    assert_eq!(
        buildings.select(|x| x.get("name").unwrap() == "Bldg").len(),
        1
    );
}

#[test]
fn field_lookup_is_case_insensitive() {
    let epm = setup();
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("Name", "main zone".into()), ("X Origin", 1.5.into())])
        .unwrap();
    assert_eq!(zone.get("NAME").unwrap(), "main zone");
    assert_eq!(zone.get("x_origin").unwrap(), 1.5);
    assert_eq!(zone.get("X Origin").unwrap(), 1.5);
    assert!(matches!(
        zone.get("no_such_field"),
        Err(epmodel::EpmError::UnknownField { .. })
    ));
}

#[test]
fn positional_set_applies_the_same_normalization() {
    let epm = setup();
    let schedule = epm
        .table("Schedule:Compact")
        .unwrap()
        .add(vec![("name", "sch".into())])
        .unwrap();
    schedule.set_at(0, "Renamed SCH").unwrap();
    assert_eq!(schedule.get("name").unwrap(), "renamed sch");
    // a reference position keeps the graph index in sync too
    let limits = epm
        .table("ScheduleTypeLimits")
        .unwrap()
        .add(vec![("name", "any number".into())])
        .unwrap();
    schedule.set_at(1, "Any Number").unwrap();
    assert!(schedule.pointing_records().unwrap().contains(&limits));
    assert!(limits.pointed_records().unwrap().contains(&schedule));
}

#[test]
fn type_schema_is_reachable_by_any_spelling() {
    let epm = setup();
    let catalog = epm.catalog();
    let schema = catalog.table_schema("SCHEDULE:COMPACT").unwrap();
    assert_eq!(schema.descriptor().name, "Schedule:Compact");
    let index = catalog.table_index("Schedule:Compact").unwrap();
    assert_eq!(catalog.canonical_name(index), "schedule_compact");
    assert!(catalog.table_schema("NoSuchType").is_err());
}

#[test]
fn unknown_field_rejected_on_add() {
    let epm = setup();
    let zones = epm.table("Zone").unwrap();
    let err = zones
        .add(vec![("name", "z".into()), ("bogus", "x".into())])
        .unwrap_err();
    match err {
        epmodel::EpmError::UnknownField { table, field } => {
            assert_eq!(table, "Zone");
            assert_eq!(field, "bogus");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(zones.is_empty());
}
