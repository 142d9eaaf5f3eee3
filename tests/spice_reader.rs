
extern crate libreda_lvs;

use std::path::Path;

use libreda_lvs::prelude::*;

fn read(source: &str) -> Netlist {
    let mut nl = Netlist::new();
    let mut reader = SpiceReader::new();
    reader.read_source(source, Path::new("test.cir"), &mut nl).unwrap();
    nl
}

// A subcircuit with resistors and a MOS device; values carry SI suffixes.
#[test]
fn test_basic_rcl_and_mos() {
    let nl = read(
        ".SUBCKT TOP 1 2 4 7\n\
         R1 6 1 7.65K\n\
         R2 3 1 7.65K\n\
         R3 3 2 2.67K\n\
         M1 6 4 7 7 HVPMOS L=0.25U W=1.5U AS=0.63P AD=0.63P PS=3.84U PD=3.84U\n\
         .ENDS\n",
    );

    assert_eq!(nl.to_string(),
        "circuit TOP ('1'='1','2'='2','4'='4','7'='7');\n\
         \x20 device RES '1' (A='6',B='1') (R=7650,L=0,W=0,A=0,P=0);\n\
         \x20 device RES '2' (A='3',B='1') (R=7650,L=0,W=0,A=0,P=0);\n\
         \x20 device RES '3' (A='3',B='2') (R=2670,L=0,W=0,A=0,P=0);\n\
         \x20 device HVPMOS '1' (S='7',G='4',D='6',B='7') (L=0.25,W=1.5,AS=0.63,AD=0.63,PS=3.84,PD=3.84);\n\
         end;\n"
    );

    let top = nl.circuit_by_name("TOP").unwrap();
    assert_eq!(nl.circuit(top).pin_count(), 4);
    let pins: Vec<_> = nl.circuit(top).each_pin().map(|p| p.name().to_string()).collect();
    assert_eq!(pins, vec!["1", "2", "4", "7"]);
}

// Parameterized subcircuits are expanded once per distinct binding into
// specialized clones; parameters propagate through inner calls.
#[test]
fn test_parameter_propagated_subcircuits() {
    let nl = read(
        ".SUBCKT SUB2 N1 N2 N3 PARAMS: L=0.15 W=1.5 M=1\n\
         MNMOS N1 N2 N3 N1 NMOS L=L W='W*M'\n\
         .ENDS\n\
         .SUBCKT SUB1 N1 N2 N3 PARAMS: L=0.15 W=1.5\n\
         XSUB2A N1 N2 N3 SUB2 L=L W=W M=1\n\
         XSUB2B N1 N2 N3 SUB2 L=L W=W M=2\n\
         .ENDS\n\
         XSUB1A A B C SUB1 L=0.15 W=1.5\n\
         XSUB1B A B C SUB1 L=0.25 W=3\n",
    );

    assert_eq!(nl.to_string(),
        "circuit .TOP ();\n\
         \x20 subcircuit 'SUB1(L=0.15,W=1.5)' SUB1A (N1=A,N2=B,N3=C);\n\
         \x20 subcircuit 'SUB1(L=0.25,W=3)' SUB1B (N1=A,N2=B,N3=C);\n\
         end;\n\
         circuit 'SUB1(L=0.15,W=1.5)' (N1=N1,N2=N2,N3=N3);\n\
         \x20 subcircuit 'SUB2(L=0.15,M=1,W=1.5)' SUB2A (N1=N1,N2=N2,N3=N3);\n\
         \x20 subcircuit 'SUB2(L=0.15,M=2,W=1.5)' SUB2B (N1=N1,N2=N2,N3=N3);\n\
         end;\n\
         circuit 'SUB2(L=0.15,M=1,W=1.5)' (N1=N1,N2=N2,N3=N3);\n\
         \x20 device NMOS NMOS (S=N3,G=N2,D=N1,B=N1) (L=150000,W=1500000,AS=0,AD=0,PS=0,PD=0);\n\
         end;\n\
         circuit 'SUB2(L=0.15,M=2,W=1.5)' (N1=N1,N2=N2,N3=N3);\n\
         \x20 device NMOS NMOS (S=N3,G=N2,D=N1,B=N1) (L=150000,W=3000000,AS=0,AD=0,PS=0,PD=0);\n\
         end;\n\
         circuit 'SUB1(L=0.25,W=3)' (N1=N1,N2=N2,N3=N3);\n\
         \x20 subcircuit 'SUB2(L=0.25,M=1,W=3)' SUB2A (N1=N1,N2=N2,N3=N3);\n\
         \x20 subcircuit 'SUB2(L=0.25,M=2,W=3)' SUB2B (N1=N1,N2=N2,N3=N3);\n\
         end;\n\
         circuit 'SUB2(L=0.25,M=1,W=3)' (N1=N1,N2=N2,N3=N3);\n\
         \x20 device NMOS NMOS (S=N3,G=N2,D=N1,B=N1) (L=250000,W=3000000,AS=0,AD=0,PS=0,PD=0);\n\
         end;\n\
         circuit 'SUB2(L=0.25,M=2,W=3)' (N1=N1,N2=N2,N3=N3);\n\
         \x20 device NMOS NMOS (S=N3,G=N2,D=N1,B=N1) (L=250000,W=6000000,AS=0,AD=0,PS=0,PD=0);\n\
         end;\n"
    );
}

// The M multiplier scales the element value and the area-like parameters.
#[test]
fn test_device_multipliers() {
    let nl = read(
        "C1 1 2 1p M=10\n\
         R1 1 2 1k M=10\n\
         M1 1 2 3 4 NMOS W=1u L=0.15u AD=0.1p M=10\n",
    );

    let top = nl.circuit_by_name(".TOP").unwrap();
    let devices: Vec<_> = nl.circuit(top).each_device().collect();
    assert_eq!(devices.len(), 3);

    let cap = devices[0];
    let cap_cls = nl.device_class(cap.class_id());
    assert!((cap.parameter_value(cap_cls.parameter_id_for_name("C").unwrap()) - 1e-11).abs() < 1e-24);

    let res = devices[1];
    let res_cls = nl.device_class(res.class_id());
    assert_eq!(res.parameter_value(res_cls.parameter_id_for_name("R").unwrap()), 100.0);

    let mos = devices[2];
    let mos_cls = nl.device_class(mos.class_id());
    assert!((mos.parameter_value(mos_cls.parameter_id_for_name("W").unwrap()) - 10.0).abs() < 1e-9);
    assert!((mos.parameter_value(mos_cls.parameter_id_for_name("L").unwrap()) - 0.15).abs() < 1e-9);
    assert!((mos.parameter_value(mos_cls.parameter_id_for_name("AD").unwrap()) - 1.0).abs() < 1e-9);
}

// Global nets become pins on all circuits that use them; the anonymous top
// circuit gets the nets but no pins.
#[test]
fn test_global_nets() {
    let nl = read(
        ".GLOBAL VDD VSS\n\
         .SUBCKT INV OUT IN\n\
         M1 OUT IN VSS VSS NMOS\n\
         M2 OUT IN VDD VDD PMOS\n\
         .ENDS\n\
         X1 B A INV\n",
    );

    assert_eq!(nl.to_string(),
        "circuit INV (OUT=OUT,IN=IN,VDD=VDD,VSS=VSS);\n\
         \x20 device NMOS '1' (S=VSS,G=IN,D=OUT,B=VSS) (L=100,W=100,AS=0,AD=0,PS=0,PD=0);\n\
         \x20 device PMOS '2' (S=VDD,G=IN,D=OUT,B=VDD) (L=100,W=100,AS=0,AD=0,PS=0,PD=0);\n\
         end;\n\
         circuit .TOP ();\n\
         \x20 subcircuit INV '1' (OUT=B,IN=A,VDD=VDD,VSS=VSS);\n\
         end;\n"
    );

    // Duplicate .GLOBAL declarations are tolerated.
    let nl = read(".GLOBAL VDD\n.GLOBAL VDD\nR1 VDD X 1K\n");
    let top = nl.circuit_by_name(".TOP").unwrap();
    assert_eq!(nl.circuit(top).pin_count(), 0);
}

// A circuit that does not touch a global net gets no pin for it.
#[test]
fn test_no_global_pins_if_unused() {
    let nl = read(
        ".GLOBAL VDD\n\
         .SUBCKT LOCAL A B\n\
         R1 A B 1K\n\
         .ENDS\n\
         X1 N1 N2 LOCAL\n\
         R2 N1 VDD 1K\n",
    );
    let local = nl.circuit_by_name("LOCAL").unwrap();
    assert_eq!(nl.circuit(local).pin_count(), 2);
}

#[test]
fn test_include() {
    let dir = std::env::temp_dir().join("libreda_lvs_reader_include_test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("inc.cir"), ".SUBCKT S A B\nR1 A B 1K\n.ENDS\n").unwrap();
    std::fs::write(dir.join("main.cir"), ".INCLUDE inc.cir\nX1 N1 N2 S\n").unwrap();

    let mut nl = Netlist::new();
    let mut reader = SpiceReader::new();
    reader.read_file(dir.join("main.cir"), &mut nl).unwrap();

    assert!(nl.circuit_by_name("S").is_some());
    let top = nl.circuit_by_name(".TOP").unwrap();
    assert_eq!(nl.circuit(top).subcircuit_count(), 1);
}

// Parse errors in an included file carry the included file's location.
#[test]
fn test_include_error_location() {
    let dir = std::env::temp_dir().join("libreda_lvs_reader_include_error_test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("bad.cir"), "* comment\n\nM1 1 2 3 NMOS\n").unwrap();
    std::fs::write(dir.join("main.cir"), ".INCLUDE bad.cir\n").unwrap();

    let mut nl = Netlist::new();
    let mut reader = SpiceReader::new();
    let err = reader.read_file(dir.join("main.cir"), &mut nl).unwrap_err();
    match err {
        SpiceReaderError::Syntax { message, file, line } => {
            assert!(message.contains("'M' element must have four nodes"));
            assert!(file.contains("bad.cir"));
            assert_eq!(line, 3);
        }
        other => panic!("Expected a located syntax error, got {:?}", other),
    }
}

// Only the section named in the .LIB statement is read.
#[test]
fn test_lib_sections() {
    let dir = std::env::temp_dir().join("libreda_lvs_reader_lib_test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("models.lib"),
        ".LIB SECA\nC1 1 2 1p\n.ENDL\n.LIB SECB\nC2 1 2 2p\n.ENDL SECB\n",
    ).unwrap();
    std::fs::write(dir.join("main.cir"), ".LIB models.lib SECB\n").unwrap();

    let mut nl = Netlist::new();
    let mut reader = SpiceReader::new();
    reader.read_file(dir.join("main.cir"), &mut nl).unwrap();

    let top = nl.circuit_by_name(".TOP").unwrap();
    let devices: Vec<_> = nl.circuit(top).each_device().collect();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name(), "2");
    assert_eq!(devices[0].parameter_value(0), 2e-12);
}

// .OPTIONS SCALE applies the geometry scale exponent of the parameters.
#[test]
fn test_options_scale() {
    let nl = read(
        ".OPTIONS SCALE=2\n\
         M1 1 2 3 4 NMOS W=1u L=1u AD=1p\n",
    );
    let top = nl.circuit_by_name(".TOP").unwrap();
    let mos = nl.circuit(top).each_device().next().unwrap();
    let cls = nl.device_class(mos.class_id());
    // Linear parameters scale with SCALE, areas with SCALE^2.
    assert!((mos.parameter_value(cls.parameter_id_for_name("W").unwrap()) - 2.0).abs() < 1e-9);
    assert!((mos.parameter_value(cls.parameter_id_for_name("AD").unwrap()) - 4.0).abs() < 1e-9);
}

// .MODEL registers parameter defaults which are bound by model reference.
#[test]
fn test_model_defaults() {
    let nl = read(
        ".MODEL RMOD R (W=1u)\n\
         R1 1 2 RMOD R=1K\n",
    );
    let top = nl.circuit_by_name(".TOP").unwrap();
    let res = nl.circuit(top).each_device().next().unwrap();
    let cls = nl.device_class(res.class_id());
    assert_eq!(cls.name().as_str(), "RMOD");
    assert_eq!(res.parameter_value(cls.parameter_id_for_name("R").unwrap()), 1000.0);
    assert_eq!(res.parameter_value(cls.parameter_id_for_name("W").unwrap()), 1.0);
}

// Escaped names are unescaped into the stored name.
#[test]
fn test_escaped_net_names() {
    let nl = read(".SUBCKT S \\$1 A\\[5\\]\nR1 \\$1 A\\[5\\] 1K\n.ENDS\n");
    let s = nl.circuit_by_name("S").unwrap();
    assert!(nl.circuit(s).net_by_name("$1").is_some());
    assert!(nl.circuit(s).net_by_name("A[5]").is_some());
}

// After `simplify`, named nets with connections become pins on top-level
// circuits. Internal nodes keep serial devices combinable.
#[test]
fn test_simplify_creates_top_level_pins() {
    let mut nl = read("R1 A B 1K\nR2 B C 1K\n");
    nl.simplify().unwrap();
    let top = nl.circuit_by_name(".TOP").unwrap();
    // All three nets carry connections, so all of them become pins. The pin
    // on B blocks the serial combination of the two resistors.
    assert_eq!(nl.circuit(top).pin_count(), 3);
    assert!(nl.circuit(top).pin_by_name("A").is_some());
    assert!(nl.circuit(top).pin_by_name("B").is_some());
    assert!(nl.circuit(top).pin_by_name("C").is_some());
    assert_eq!(nl.circuit(top).device_count(), 2);

    // Without the pin on the internal node the chain combines.
    let mut nl = read("R1 A B 1K\nR2 B C 1K\n");
    nl.combine_devices();
    let top = nl.circuit_by_name(".TOP").unwrap();
    assert_eq!(nl.circuit(top).device_count(), 1);
    let d = nl.circuit(top).each_device().next().unwrap();
    assert_eq!(d.parameter_value(0), 2000.0);
    assert!(nl.circuit(top).net_by_name("B").is_none());
}
