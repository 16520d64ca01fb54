use std::fs;
use std::path::{Path, PathBuf};

use netbind::*;

const HISTORY_HEADER: &str = "designator\tcode\tnets\tvariable_name\tclass\tvalue\tpart_number";

fn history_path(dir: &Path) -> PathBuf {
    dir.join("board.trace.refdes_mapping")
}

/// Run `trace` as `board.trace` in `dir` and return the designators in creation order
fn run(dir: &Path, trace: &str) -> Vec<String> {
    let path = dir.join("board.trace");
    fs::write(&path, trace).unwrap();

    let mut session = Session::new(EngineConfig::default().with_history(history_path(dir)));
    let design = session.load_trace(&path).unwrap();
    design.components().iter().map(|part| part.label()).collect()
}

fn design(config: EngineConfig) -> DesignContext {
    DesignContext::new("stability", ArchetypeRegistry::with_standard_parts(), config)
}

const PULLUP: &str = "\
I2C pull-up
.net VCC
.net SDA
.part r_pullup R value=10k refdes=R7
.connect VCC r_pullup
.connect SDA r_pullup role=secondary
";

const PULLUP_UNNAMED: &str = "\
I2C pull-up
.net VCC
.net SDA
.part r_pullup R value=10k
.connect VCC r_pullup
.connect SDA r_pullup role=secondary
";

#[test]
fn test_unchanged_component_keeps_designator() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run(dir.path(), PULLUP), vec!["R7"]);

    // Dropping the explicit designator only changes the code anchor
    assert_eq!(run(dir.path(), PULLUP_UNNAMED), vec!["R7"]);
    assert_eq!(run(dir.path(), PULLUP_UNNAMED), vec!["R7"]);
}

#[test]
fn test_renamed_variable_keeps_designator() {
    let dir = tempfile::tempdir().unwrap();
    run(dir.path(), PULLUP);

    let renamed = PULLUP_UNNAMED.replace("r_pullup", "r_sda");
    assert_eq!(run(dir.path(), &renamed), vec!["R7"]);
}

#[test]
fn test_only_variable_name_changed_matches_five_anchors() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_history(history_path(dir.path()));
    let source = dir.path().join("board.py");
    let text = "vcc = Net('VCC')\nsda = Net('SDA')\npullup = R('10k')\nvcc << pullup\nsda << pullup\n";

    let build = |name: &str, designator: Option<&str>| {
        let mut design = design(config.clone());
        design.sources_mut().insert(&source, text);
        let vcc = design.create_net(Some("VCC"), None).unwrap();
        let sda = design.create_net(Some("SDA"), None).unwrap();
        let r = design.registry().lookup("R").unwrap();
        let mut spec = ComponentSpec::new(r)
            .value("10k")
            .provenance(Provenance::at(&source, 3).with_name(name));
        if let Some(designator) = designator {
            spec = spec.designator(designator);
        }
        let part = design.create_component(spec).unwrap();
        let p1 = design.pin(part, "P1").unwrap();
        let p2 = design.pin(part, "P2").unwrap();
        design.connect_in(vcc, &[p1.into()]).unwrap();
        design.connect_in(sda, &[p2.into()]).unwrap();
        design.finalize().unwrap()
    };

    let before = build("pullup", Some("R7"));
    let after = build("r_sda", None);
    assert_eq!(after.components()[0].label(), "R7");

    let (old, new) = (&before.anchors()[0].anchors, &after.anchors()[0].anchors);
    assert!(old.code.is_some());
    assert_eq!(old.code, new.code);
    assert_ne!(old.variable_name, new.variable_name);
    assert_eq!(old.score(new), 5);
}

#[test]
fn test_reworked_component_gets_fresh_designator() {
    let dir = tempfile::tempdir().unwrap();
    run(dir.path(), PULLUP);

    let reworked = "\
I2C pull-up
.net GND
.net SCL
.part r_clock R value=4.7k
.connect GND r_clock
.connect SCL r_clock role=secondary
";
    assert_eq!(run(dir.path(), reworked), vec!["R1"]);
}

#[test]
fn test_kept_component_pushes_new_ones_past_it() {
    let dir = tempfile::tempdir().unwrap();
    let first = "\
Bus
.net VCC
.net SDA
.net SCL
.part r_sda R value=10k
.part r_scl R value=2.2k
.connect VCC r_sda
.connect SDA r_sda role=secondary
.connect VCC r_scl
.connect SCL r_scl role=secondary
";
    assert_eq!(run(dir.path(), first), vec!["R1", "R2"]);

    let second = "\
Bus
.net VCC
.net SCL
.net $led
.part r_scl R value=2.2k
.part r_led R value=330
.connect VCC r_scl
.connect SCL r_scl role=secondary
.connect VCC r_led
.connect $led r_led role=secondary
";
    assert_eq!(run(dir.path(), second), vec!["R2", "R3"]);

    let saved = fs::read_to_string(history_path(dir.path())).unwrap();
    let rows: Vec<&str> = saved.lines().collect();
    assert_eq!(rows[0], HISTORY_HEADER);
    assert_eq!(rows.len(), 3);
    assert!(rows[1].starts_with("R2\t"));
    assert!(rows[2].starts_with("R3\t"));
    assert!(rows[2].contains("\tr_led\tR\t330\u{03A9}\t330\u{03A9}"));
}

#[test]
fn test_vacated_numbers_are_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let first = "\
Pair
.net VCC
.net X
.net Y
.part r_a R value=10k
.part r_b R value=2.2k
.connect VCC r_a
.connect X r_a role=secondary
.connect VCC r_b
.connect Y r_b role=secondary
";
    assert_eq!(run(dir.path(), first), vec!["R1", "R2"]);

    let second = "\
Pair
.net VCC
.net X
.net Y
.part r_new R value=47k
.part r_b R value=2.2k
.connect VCC r_new
.connect X r_new role=secondary
.connect VCC r_b
.connect Y r_b role=secondary
";
    assert_eq!(run(dir.path(), second), vec!["R3", "R2"]);
}

#[test]
fn test_explicit_designator_advances_counter() {
    let mut design = design(EngineConfig::default());
    let r = design.registry().lookup("R").unwrap();
    design
        .create_component(ComponentSpec::new(r).designator("R5"))
        .unwrap();
    design.create_component(ComponentSpec::new(r)).unwrap();
    let c = design.registry().lookup("C").unwrap();
    design.create_component(ComponentSpec::new(c)).unwrap();

    let finalized = design.finalize().unwrap();
    let labels: Vec<String> = finalized.components().iter().map(|p| p.label()).collect();
    assert_eq!(labels, vec!["R5", "R6", "C1"]);

    let mut design = crate::design(EngineConfig::default());
    design.create_component(ComponentSpec::new(r)).unwrap();
    design
        .create_component(ComponentSpec::new(r).designator("R5"))
        .unwrap();
    let finalized = design.finalize().unwrap();
    let labels: Vec<String> = finalized.components().iter().map(|p| p.label()).collect();
    assert_eq!(labels, vec!["R6", "R5"]);
}

#[test]
fn test_explicit_designator_wins_over_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_history(history_path(dir.path()));

    let mut first = design(config.clone());
    let r = first.registry().lookup("R").unwrap();
    first
        .create_component(
            ComponentSpec::new(r)
                .value("10k")
                .provenance(Provenance::named("r_a")),
        )
        .unwrap();
    assert_eq!(first.finalize().unwrap().components()[0].label(), "R1");

    let mut second = design(config);
    second
        .create_component(
            ComponentSpec::new(r)
                .value("1k")
                .designator("R1")
                .provenance(Provenance::named("r_b")),
        )
        .unwrap();
    second
        .create_component(
            ComponentSpec::new(r)
                .value("10k")
                .provenance(Provenance::named("r_a")),
        )
        .unwrap();

    let finalized = second.finalize().unwrap();
    assert_eq!(finalized.component_by_designator("R1").unwrap().value, "1k\u{03A9}");
    assert_eq!(finalized.component_by_designator("R2").unwrap().value, "10k\u{03A9}");
}

#[test]
fn test_duplicate_remembered_designator_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let history = history_path(dir.path());
    let saved = format!(
        "{}\nR3\t\t\tr_x\tR\t10k\u{03A9}\t10k\nR3\t\t\tr_x\tR\t10k\u{03A9}\t10k\n",
        HISTORY_HEADER
    );
    fs::write(&history, &saved).unwrap();

    let mut design = design(EngineConfig::default().with_history(&history));
    let r = design.registry().lookup("R").unwrap();
    for _ in 0..2 {
        design
            .create_component(
                ComponentSpec::new(r)
                    .value("10k")
                    .part_number("10k")
                    .provenance(Provenance::named("r_x")),
            )
            .unwrap();
    }

    let err = design.finalize().unwrap_err();
    assert!(matches!(err, DesignError::DuplicateDesignator { ref designator, .. } if designator == "R3"));
    assert_eq!(fs::read_to_string(&history).unwrap(), saved);
}

#[test]
fn test_malformed_history_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let history = history_path(dir.path());
    fs::write(&history, "code\tclass\nc1234\tR\n").unwrap();

    let mut design = design(EngineConfig::default().with_history(&history));
    let r = design.registry().lookup("R").unwrap();
    design.create_component(ComponentSpec::new(r)).unwrap();
    assert!(matches!(design.finalize(), Err(DesignError::History { .. })));
}

#[test]
fn test_anonymous_nets_named_after_first_pin() {
    let dir = tempfile::tempdir().unwrap();
    let trace = "\
Filter
.net VIN
.net $node
.net $unused
.part r1 R value=1k
.part c1 C value=100n
.part r2 R value=2k
.connect VIN r1
.connect $node in r1.2 out c1.1
.connect c1.2 any r2
";
    fs::write(dir.path().join("board.trace"), trace).unwrap();

    let mut session = Session::new(EngineConfig::default());
    let design = session.load_trace(&dir.path().join("board.trace")).unwrap();

    let names: Vec<&str> = design.nets().iter().map(|net| design.net_name(net.id)).collect();
    assert_eq!(names, vec!["VIN", "ANON_NET_R1_P2", "ANON_NET_2", "ANON_NET_C1_P2"]);
}

#[test]
fn test_connecting_a_bound_pin_again_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.trace");
    fs::write(
        &path,
        "Broken\n.net A\n.net B\n.part r1 R\n.connect A r1.1\n.connect B r1.1\n",
    )
    .unwrap();

    let history = history_path(dir.path());
    let mut session = Session::new(EngineConfig::default().with_history(&history));
    let err = session.load_trace(&path).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<DesignError>(),
        Some(DesignError::DoubleBinding { .. })
    ));
    assert!(!history.exists());
}
