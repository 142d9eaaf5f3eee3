
extern crate libreda_lvs;

use std::path::Path;

use libreda_lvs::prelude::*;

fn read(source: &str) -> Netlist {
    let mut nl = Netlist::new();
    let mut reader = SpiceReader::new();
    reader.read_source(source, Path::new("test.cir"), &mut nl).unwrap();
    nl
}

const RINGO_FRAGMENT: &str =
    ".SUBCKT INV OUT IN VDD VSS\n\
     M1 OUT IN VSS VSS NMOS L=0.25U W=1U\n\
     M2 OUT IN VDD VDD PMOS L=0.25U W=2U\n\
     .ENDS\n\
     .SUBCKT RINGO OUT VDD VSS\n\
     X1 N1 OUT VDD VSS INV\n\
     X2 N2 N1 VDD VSS INV\n\
     X3 OUT N2 VDD VSS INV\n\
     .ENDS\n";

// The comparer is reflexive: a netlist compares equal with itself.
#[test]
fn test_compare_is_reflexive() {
    let a = read(RINGO_FRAGMENT);
    let b = read(RINGO_FRAGMENT);

    let comparer = NetlistComparer::new();
    let mut xref = CrossReference::new();
    assert!(comparer.compare_with_logger(&a, &b, &mut xref).unwrap());

    assert_eq!(xref.circuit_pairs.len(), 2);
    assert!(xref.circuit_pairs.iter().all(|p| p.matching));
    assert!(xref.unmatched_circuits.is_empty());
    assert!(xref.skipped_circuits.is_empty());
    // Every net, device and subcircuit found its counterpart.
    for pair in &xref.circuit_pairs {
        assert!(pair.nets.iter().all(|r| r.status != MatchStatus::Mismatch));
        assert!(pair.devices.iter().all(|r| r.status == MatchStatus::Match));
        assert!(pair.subcircuits.iter().all(|r| r.status == MatchStatus::Match));
    }
}

// The verdict does not depend on the argument order.
#[test]
fn test_compare_is_symmetric() {
    let a = read(RINGO_FRAGMENT);
    // A deviation: one transistor has a different width.
    let b = read(&RINGO_FRAGMENT.replace("W=1U", "W=4U"));

    let comparer = NetlistComparer::new();
    assert!(!comparer.compare(&a, &b).unwrap());
    assert!(!comparer.compare(&b, &a).unwrap());
    assert!(comparer.compare(&a, &a).unwrap());
}

// The textual round trip preserves compare equality.
#[test]
fn test_compare_after_round_trip() {
    let a = read(RINGO_FRAGMENT);
    let text = a.to_string();

    let mut b = Netlist::new();
    b.set_case_sensitive(false);
    b.add_device_class(mos4("NMOS"));
    b.add_device_class(mos4("PMOS"));
    b.from_string(&text).unwrap();

    assert!(NetlistComparer::new().compare(&a, &b).unwrap());
}

// Swapping source and drain of every transistor is tolerated because the
// MOS class marks S and D equivalent; with strict classes it is a mismatch.
#[test]
fn test_swapped_mos_terminals() {
    let source_straight =
        ".SUBCKT INV OUT IN VDD VSS\n\
         M1 OUT IN VSS VSS NMOS L=0.25U W=0.95U\n\
         M2 OUT IN VDD VDD PMOS L=0.25U W=1.5U\n\
         .ENDS\n";
    // The same inverter with S/D swapped on both transistors.
    let source_swapped =
        ".SUBCKT INV OUT IN VDD VSS\n\
         M1 VSS IN OUT VSS NMOS L=0.25U W=0.95U\n\
         M2 VDD IN OUT VDD PMOS L=0.25U W=1.5U\n\
         .ENDS\n";

    let a = read(source_straight);
    let b = read(source_swapped);
    assert!(NetlistComparer::new().compare(&a, &b).unwrap());

    // Strict classes disable the S/D equivalence.
    let mut a = read(source_straight);
    let mut b = read(source_swapped);
    for nl in [&mut a, &mut b] {
        for name in ["NMOS", "PMOS"] {
            let cls = nl.device_class_by_name(name).unwrap();
            nl.device_class_mut(cls).set_strict(true);
        }
    }
    assert!(!NetlistComparer::new().compare(&a, &b).unwrap());
}

// Devices with deviating parameters are paired but tagged, and the circuit
// does not match. A tolerance-based comparer accepts the deviation.
#[test]
fn test_parameter_tolerance() {
    let a = read(".SUBCKT S A B\nR1 A B 100\n.ENDS\n");
    let b = read(".SUBCKT S A B\nR1 A B 101\n.ENDS\n");

    let comparer = NetlistComparer::new();
    let mut xref = CrossReference::new();
    assert!(!comparer.compare_with_logger(&a, &b, &mut xref).unwrap());
    let pair = &xref.circuit_pairs[0];
    assert!(pair.devices.iter().any(|r| r.status == MatchStatus::MatchWithParameters));

    // Install a comparer with an absolute tolerance of 2 Ohm on R.
    let mut a = a;
    let res = a.device_class_by_name("RES").unwrap();
    let r_id = a.device_class(res).parameter_id_for_name("R").unwrap();
    a.device_class_mut(res).set_parameter_comparer(EqualDeviceParameters::new(r_id, 2.0, 0.0));
    assert!(NetlistComparer::new().compare(&a, &b).unwrap());
}

// Ignoring a parameter excludes it from the comparison.
#[test]
fn test_parameter_ignore() {
    let a = read(".SUBCKT S A B\nM1 A B B B NMOS L=1U W=2U\n.ENDS\n");
    let b = read(".SUBCKT S A B\nM1 A B B B NMOS L=1U W=3U\n.ENDS\n");

    assert!(!NetlistComparer::new().compare(&a, &b).unwrap());

    let mut a = a;
    let cls = a.device_class_by_name("NMOS").unwrap();
    let w_id = a.device_class(cls).parameter_id_for_name("W").unwrap();
    a.device_class_mut(cls).set_parameter_comparer(EqualDeviceParameters::ignore(w_id));
    assert!(NetlistComparer::new().compare(&a, &b).unwrap());
}

// A mismatching child circuit causes the parents to be reported as skipped.
#[test]
fn test_mismatched_child_skips_parent() {
    let a = read(
        ".SUBCKT CELL A B\nR1 A B 100\n.ENDS\n\
         .SUBCKT TOP A B\nX1 A B CELL\n.ENDS\n");
    let b = read(
        ".SUBCKT CELL A B\nR1 A B 100\nR2 A B 100\n.ENDS\n\
         .SUBCKT TOP A B\nX1 A B CELL\n.ENDS\n");

    let comparer = NetlistComparer::new();
    let mut xref = CrossReference::new();
    assert!(!comparer.compare_with_logger(&a, &b, &mut xref).unwrap());
    assert_eq!(xref.skipped_circuits.len(), 1);
    assert_eq!(xref.skipped_circuits[0].0.as_deref(), Some("TOP"));
}

// A circuit without a counterpart is reported as a circuit mismatch.
#[test]
fn test_unmatched_circuit() {
    let a = read(".SUBCKT S A B\nR1 A B 100\n.ENDS\n.SUBCKT EXTRA A B\nR1 A B 1\n.ENDS\n");
    let b = read(".SUBCKT S A B\nR1 A B 100\n.ENDS\n");

    let comparer = NetlistComparer::new();
    let mut xref = CrossReference::new();
    assert!(!comparer.compare_with_logger(&a, &b, &mut xref).unwrap());
    assert!(xref.unmatched_circuits.iter().any(|(a, _)| a.as_deref() == Some("EXTRA")));
}

// `same_circuits` pairs circuits with different names.
#[test]
fn test_same_circuits_binding() {
    let a = read(".SUBCKT S_LAYOUT A B\nR1 A B 100\n.ENDS\n");
    let b = read(".SUBCKT S_SCHEMATIC A B\nR1 A B 100\n.ENDS\n");

    assert!(!NetlistComparer::new().compare(&a, &b).unwrap());

    let mut comparer = NetlistComparer::new();
    comparer.same_circuits(
        a.circuit_by_name("S_LAYOUT").unwrap(),
        b.circuit_by_name("S_SCHEMATIC").unwrap());
    assert!(comparer.compare(&a, &b).unwrap());
}

// `same_device_classes` merges device classes with different names; matched
// devices are tagged with the class deviation but the circuits match.
#[test]
fn test_same_device_classes_binding() {
    let a = read(".SUBCKT S A B\nR1 A B RPOLY R=100\n.ENDS\n");
    let b = read(".SUBCKT S A B\nR1 A B RDIFF R=100\n.ENDS\n");

    assert!(!NetlistComparer::new().compare(&a, &b).unwrap());

    let mut comparer = NetlistComparer::new();
    comparer.same_device_classes(
        a.device_class_by_name("RPOLY").unwrap(),
        b.device_class_by_name("RDIFF").unwrap());
    let mut xref = CrossReference::new();
    assert!(comparer.compare_with_logger(&a, &b, &mut xref).unwrap());
    let pair = &xref.circuit_pairs[0];
    assert!(pair.devices.iter().any(|r| r.status == MatchStatus::MatchWithDifferentClasses));
}

// Swappable pins: a child used with crossed connections matches only when
// its pins are declared equivalent on the reference side.
#[test]
fn test_equivalent_pins() {
    let child =
        ".SUBCKT SER P1 P2\n\
         R1 P1 M 100\n\
         R2 M P2 100\n\
         .ENDS\n";
    let parent_straight = format!("{}X1 NA NB SER\nR3 NA X 50\n", child);
    let parent_crossed = format!("{}X1 NB NA SER\nR3 NA X 50\n", child);

    let a = read(&parent_crossed);
    let b = read(&parent_straight);

    assert!(!NetlistComparer::new().compare(&a, &b).unwrap());

    let mut comparer = NetlistComparer::new();
    comparer.equivalent_pins(b.circuit_by_name("SER").unwrap(), &[0, 1]);
    assert!(comparer.compare(&a, &b).unwrap());
}

// Small parasitic capacitors can be filtered away.
#[test]
fn test_device_filters() {
    let a = read(".SUBCKT S A B\nR1 A B 100\nC1 A B 1f\n.ENDS\n");
    let b = read(".SUBCKT S A B\nR1 A B 100\n.ENDS\n");

    assert!(!NetlistComparer::new().compare(&a, &b).unwrap());

    let mut comparer = NetlistComparer::new();
    comparer.exclude_caps(1e-12);
    assert!(comparer.compare(&a, &b).unwrap());

    // Very large resistors can be filtered likewise.
    let a = read(".SUBCKT S A B\nR1 A B 100\nR2 A B 10G\n.ENDS\n");
    let b = read(".SUBCKT S A B\nR1 A B 100\n.ENDS\n");
    let mut comparer = NetlistComparer::new();
    comparer.exclude_resistors(1e6);
    assert!(comparer.compare(&a, &b).unwrap());
}

// `same_nets` forces a seed identity for the matcher.
#[test]
fn test_same_nets_seed() {
    // Two indistinguishable parallel branches; the seed forces one pairing.
    let source =
        ".SUBCKT S A B\n\
         R1 A M1 100\n\
         R2 M1 B 200\n\
         R3 A M2 100\n\
         R4 M2 B 200\n\
         .ENDS\n";
    let a = read(source);
    let b = read(source);

    let ca = a.circuit_by_name("S").unwrap();
    let cb = b.circuit_by_name("S").unwrap();
    let na = a.circuit(ca).net_by_name("M1").unwrap();
    let nb = b.circuit(cb).net_by_name("M2").unwrap();

    let mut comparer = NetlistComparer::new();
    comparer.set_dont_consider_net_names(true);
    comparer.same_nets(ca, na, cb, nb, true);
    assert!(comparer.compare(&a, &b).unwrap());
}

// Ambiguous pairings are reported as ambiguous matches.
#[test]
fn test_ambiguous_nets_are_tagged() {
    let source =
        ".SUBCKT S A B\n\
         R1 A M1 100\n\
         R2 M1 B 200\n\
         R3 A M2 100\n\
         R4 M2 B 200\n\
         .ENDS\n";
    let a = read(source);
    let b = read(&source.replace("M1", "N1").replace("M2", "N2"));

    let comparer = NetlistComparer::new();
    let mut xref = CrossReference::new();
    // The two internal branch nodes are interchangeable; the compare
    // succeeds but tags the arbitrary pairings.
    assert!(comparer.compare_with_logger(&a, &b, &mut xref).unwrap());
    let pair = &xref.circuit_pairs[0];
    assert!(pair.nets.iter().any(|r| r.status == MatchStatus::MatchAmbiguous));
}

// Nets whose exchange leaves the circuit invariant can be joined.
#[test]
fn test_join_symmetric_nets() {
    let mut nl = read(
        ".SUBCKT S A B\n\
         R1 A M1 100\n\
         R2 M1 B 100\n\
         R3 A M2 100\n\
         R4 M2 B 100\n\
         .ENDS\n");
    let s = nl.circuit_by_name("S").unwrap();
    assert_eq!(nl.circuit(s).net_count(), 4);

    let comparer = NetlistComparer::new();
    comparer.join_symmetric_nets(&mut nl, s);

    // M1 and M2 are symmetric and collapse into one net.
    assert_eq!(nl.circuit(s).net_count(), 3);

    // After joining, the parallel devices combine.
    nl.combine_devices();
    assert_eq!(nl.circuit(s).device_count(), 2);
    for d in nl.circuit(s).each_device() {
        assert_eq!(d.parameter_value(0), 50.0);
    }
}

// `unmatched_circuits` lists the circuits which could be flattened before
// a compare. Top-level circuits are not reported.
#[test]
fn test_unmatched_circuits_helper() {
    let a = read(
        ".SUBCKT WRAP A B\nR1 A B 100\n.ENDS\n\
         .SUBCKT TOP A B\nX1 A B WRAP\n.ENDS\n");
    let b = read(".SUBCKT TOP A B\nR1 A B 100\n.ENDS\n");

    let comparer = NetlistComparer::new();
    let (in_a, in_b) = comparer.unmatched_circuits(&a, &b);
    assert_eq!(in_a, vec![a.circuit_by_name("WRAP").unwrap()]);
    assert!(in_b.is_empty());

    // Flattening the unmatched circuit makes the netlists comparable.
    let mut a = a;
    for c in in_a {
        a.flatten_circuit(c);
    }
    assert!(comparer.compare(&a, &b).unwrap());
}
