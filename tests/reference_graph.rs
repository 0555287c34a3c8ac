use epmodel::construct::Epm;
use epmodel::EpmError;

fn setup() -> Epm {
    let _ = tracing_subscriber::fmt::try_init();
    Epm::new()
}

#[test]
fn pointing_and_pointed_resolve_by_current_name() {
    let epm = setup();
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "main zone".into())])
        .unwrap();
    let wall = epm
        .table("Construction")
        .unwrap()
        .add(vec![("name", "wall".into())])
        .unwrap();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "north wall".into()),
            ("surface_type", "wall".into()),
            ("construction_name", (&wall).into()),
            ("zone_name", "main zone".into()),
        ])
        .unwrap();
    let pointing = surface.pointing_records().unwrap();
    assert!(pointing.contains(&zone));
    assert!(pointing.contains(&wall));
    assert_eq!(pointing.table("Zone").unwrap().one().unwrap(), zone);
    assert!(zone.pointed_records().unwrap().contains(&surface));
    assert!(wall.pointed_records().unwrap().contains(&surface));
}

#[test]
fn rename_breaks_the_link_without_error() {
    let epm = setup();
    let zones = epm.table("Zone").unwrap();
    let zone = zones.add(vec![("name", "main zone".into())]).unwrap();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "north wall".into()),
            ("zone_name", (&zone).into()),
        ])
        .unwrap();
    assert!(zone.pointed_records().unwrap().contains(&surface));

    // renaming does not rewrite the stored reference string
    zone.set("name", "renamed zone").unwrap();
    assert!(!zone.pointed_records().unwrap().contains(&surface));
    assert_eq!(surface.get("zone_name").unwrap(), "main zone");
    assert!(surface.pointing_records().unwrap().table("Zone").unwrap().is_empty());

    // a new record taking the old name picks the reference back up
    let replacement = zones.add(vec![("name", "Main Zone".into())]).unwrap();
    assert!(replacement.pointed_records().unwrap().contains(&surface));
    assert!(!zone.pointed_records().unwrap().contains(&surface));
}

#[test]
fn forward_references_attach_when_the_target_appears() {
    let epm = setup();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "south wall".into()),
            ("zone_name", "later zone".into()),
        ])
        .unwrap();
    assert!(surface.pointing_records().unwrap().is_empty());
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "later zone".into())])
        .unwrap();
    assert!(surface.pointing_records().unwrap().contains(&zone));
    assert!(zone.pointed_records().unwrap().contains(&surface));
}

#[test]
fn deletion_leaves_the_stale_reference_string() {
    let epm = setup();
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "main zone".into())])
        .unwrap();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "north wall".into()),
            ("zone_name", (&zone).into()),
        ])
        .unwrap();
    zone.delete().unwrap();
    // no cascade: the pointer record survives with its stored string intact
    assert_eq!(surface.get("zone_name").unwrap(), "main zone");
    assert!(surface.pointing_records().unwrap().is_empty());
}

#[test]
fn pointed_results_group_by_record_type() {
    let epm = setup();
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "main zone".into())])
        .unwrap();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "north wall".into()),
            ("zone_name", (&zone).into()),
        ])
        .unwrap();
    let infiltration = epm
        .table("ZoneInfiltration:DesignFlowRate")
        .unwrap()
        .add(vec![
            ("name", "infiltration".into()),
            ("zone_or_zonelist_name", (&zone).into()),
        ])
        .unwrap();
    let pointed = zone.pointed_records().unwrap();
    assert_eq!(pointed.len(), 2);
    assert_eq!(
        pointed.tables(),
        ["BuildingSurface:Detailed", "ZoneInfiltration:DesignFlowRate"]
    );
    assert_eq!(pointed.table("BuildingSurface:Detailed").unwrap().one().unwrap(), surface);
    assert_eq!(
        pointed
            .table("ZoneInfiltration:DesignFlowRate")
            .unwrap()
            .one()
            .unwrap(),
        infiltration
    );
    assert_eq!(pointed.records().len(), 2);
}

#[test]
fn reference_resolution_ignores_case() {
    let epm = setup();
    let schedule = epm
        .table("Schedule:Compact")
        .unwrap()
        .add(vec![
            ("name", "heating schedule".into()),
            ("schedule_type_limits_name", "Any Number".into()),
        ])
        .unwrap();
    let limits = epm
        .table("ScheduleTypeLimits")
        .unwrap()
        .add(vec![("name", "ANY NUMBER".into())])
        .unwrap();
    assert!(schedule.pointing_records().unwrap().contains(&limits));
}

#[test]
fn validator_reports_dangling_references() {
    let epm = setup();
    epm.table("Zone")
        .unwrap()
        .add(vec![("name", "main zone".into())])
        .unwrap();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "north wall".into()),
            ("zone_name", "main zone".into()),
        ])
        .unwrap();
    epm.check_references().unwrap();
    surface.set("zone_name", "no such zone").unwrap();
    let err = epm.check_references().unwrap_err();
    match err {
        EpmError::DanglingReference {
            table,
            name,
            target,
            reference,
        } => {
            assert_eq!(table, "BuildingSurface:Detailed");
            assert_eq!(name, "north wall");
            assert_eq!(target, "Zone");
            assert_eq!(reference, "no such zone");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn numeric_names_resolve_and_display_textually() {
    let epm = Epm::from_text("Zone, 101;").unwrap();
    let zone = epm.table("Zone").unwrap().get(0).unwrap();
    assert_eq!(zone.name().unwrap(), "101");
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![
            ("name", "wall".into()),
            ("zone_name", 101.0.into()),
        ])
        .unwrap();
    assert!(zone.pointed_records().unwrap().contains(&surface));
    assert!(surface.pointing_records().unwrap().contains(&zone));
}

#[test]
fn setting_a_reference_from_a_record_stores_its_current_name() {
    let epm = setup();
    let zone = epm
        .table("Zone")
        .unwrap()
        .add(vec![("name", "main zone".into())])
        .unwrap();
    let surface = epm
        .table("BuildingSurface:Detailed")
        .unwrap()
        .add(vec![("name", "east wall".into())])
        .unwrap();
    surface.set("zone_name", &zone).unwrap();
    assert_eq!(surface.get("zone_name").unwrap(), "main zone");
    // the stored string does not follow later renames
    zone.set("name", "zone two").unwrap();
    assert_eq!(surface.get("zone_name").unwrap(), "main zone");
}
