//! Binary-codec and validator tests: canonical round trips, malformed
//! inputs, and invalid modules.

use karst_vm::binary::{decode_module, encode_module, decode_name_section, encode_name_section};
use karst_vm::fuzzing::generate_module;
use karst_vm::indices::{FuncIndex, LocalIndex, TypeIndex};
use karst_vm::ir::{DisassemblyNames, FeatureSpec, FunctionNames};
use karst_vm::printer::print_module;
use karst_vm::types::{CallingConvention, ValueType};
use karst_vm::validate::validate_module;
use karst_vm::Error;

/// `(module (func (export "add") (param i32 i32) (result i32)
///    local.get 0 local.get 1 i32.add))`
fn add_module_bytes() -> Vec<u8> {
    let mut bytes = vec![
        0x00, 0x61, 0x73, 0x6D, // magic
        0x01, 0x00, 0x00, 0x00, // version
    ];
    // Type section: (i32, i32) -> i32.
    bytes.extend_from_slice(&[0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F]);
    // Function section.
    bytes.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    // Export section: "add" -> func 0.
    bytes.extend_from_slice(&[0x07, 0x07, 0x01, 0x03, b'a', b'd', b'd', 0x00, 0x00]);
    // Code section: local.get 0; local.get 1; i32.add; end.
    bytes.extend_from_slice(&[
        0x0A, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B,
    ]);
    bytes
}

#[test]
fn add_module_round_trips_byte_identically() {
    let bytes = add_module_bytes();
    let module = decode_module(&bytes, FeatureSpec::standard()).unwrap();

    assert_eq!(module.types.len(), 1);
    let ty = module.function_type(FuncIndex::from_u32(0)).unwrap();
    assert_eq!(ty.params().elems(), &[ValueType::I32, ValueType::I32]);
    assert_eq!(ty.results().elems(), &[ValueType::I32]);
    assert_eq!(ty.calling_convention(), CallingConvention::Wasm);
    assert_eq!(module.exports.len(), 1);
    assert_eq!(module.exports[0].name, "add");

    // The input is already canonical, so encoding reproduces it exactly.
    assert_eq!(encode_module(&module), bytes);

    let text = print_module(&module, None);
    assert!(text.contains("i32.add"));
    assert!(text.contains("(export \"add\""));
}

#[test]
fn overlong_lebs_are_canonicalized() {
    let mut bytes = add_module_bytes();
    // Rewrite `local.get 0` as `local.get` with a two-byte index encoding.
    let code = [
        0x0A, 0x0A, 0x01, 0x08, 0x00, 0x20, 0x80, 0x00, 0x20, 0x01, 0x6A, 0x0B,
    ];
    let code_offset = bytes.len() - 11;
    bytes.truncate(code_offset);
    bytes.extend_from_slice(&code);

    let module = decode_module(&bytes, FeatureSpec::standard()).unwrap();
    // Encoding normalizes the LEB back to its shortest form.
    assert_eq!(encode_module(&module), add_module_bytes());
}

#[test]
fn empty_stack_type_mismatch_message() {
    let mut bytes = vec![
        0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F,
        0x03, 0x02, 0x01, 0x00,
    ];
    // Code: local.get 0; i32.add; end -- one operand short.
    bytes.extend_from_slice(&[0x0A, 0x07, 0x01, 0x05, 0x00, 0x20, 0x00, 0x6A, 0x0B]);

    let error = decode_module(&bytes, FeatureSpec::standard()).unwrap_err();
    match error {
        Error::Validation(e) => assert_eq!(
            e.message,
            "type mismatch: expected i32 but stack was empty in i32.add operand"
        ),
        other => panic!("expected a validation error, got {other}"),
    }
}

#[test]
fn unreachable_body_validates() {
    let mut bytes = vec![
        0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7F, // () -> i32
        0x03, 0x02, 0x01, 0x00,
    ];
    // Code: unreachable; end.
    bytes.extend_from_slice(&[0x0A, 0x05, 0x01, 0x03, 0x00, 0x00, 0x0B]);
    decode_module(&bytes, FeatureSpec::standard()).unwrap();
}

#[test]
fn bad_magic_is_malformed() {
    let bytes = b"\0wasm\x01\0\0\0".to_vec();
    match decode_module(&bytes, FeatureSpec::standard()).unwrap_err() {
        Error::Serialization(e) => assert!(e.message().contains("magic")),
        other => panic!("expected a serialization error, got {other}"),
    }
}

#[test]
fn out_of_order_sections_are_malformed() {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    // Memory section (5) followed by a table section (4).
    bytes.extend_from_slice(&[0x05, 0x03, 0x01, 0x00, 0x01]);
    bytes.extend_from_slice(&[0x04, 0x04, 0x01, 0x70, 0x00, 0x00]);
    match decode_module(&bytes, FeatureSpec::standard()).unwrap_err() {
        Error::Serialization(e) => assert!(e.message().contains("out-of-order")),
        other => panic!("expected a serialization error, got {other}"),
    }
}

#[test]
fn unknown_value_type_is_malformed() {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&[0x01, 0x05, 0x01, 0x60, 0x01, 0x19, 0x00]);
    assert!(matches!(
        decode_module(&bytes, FeatureSpec::standard()),
        Err(Error::Serialization(_))
    ));
}

#[test]
fn bad_data_segment_flags_are_malformed() {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&[0x05, 0x03, 0x01, 0x00, 0x01]); // memory 0..1
    bytes.extend_from_slice(&[0x0B, 0x03, 0x01, 0x03, 0x00]); // data, flags 3
    match decode_module(&bytes, FeatureSpec::standard()).unwrap_err() {
        Error::Serialization(e) => assert!(e.message().contains("data segment flags")),
        other => panic!("expected a serialization error, got {other}"),
    }
}

#[test]
fn section_length_overrun_is_malformed() {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&[0x01, 0x20, 0x01]); // type section claims 32 bytes
    assert!(matches!(
        decode_module(&bytes, FeatureSpec::standard()),
        Err(Error::Serialization(_))
    ));
}

#[test]
fn mutable_global_import_requires_feature_flag() {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    // (import "env" "x" (global (mut i32)))
    bytes.extend_from_slice(&[
        0x02, 0x0A, 0x01, 0x03, b'e', b'n', b'v', 0x01, b'x', 0x03, 0x7F, 0x01,
    ]);

    let mut features = FeatureSpec::standard();
    features.import_export_mutable_globals = false;
    assert!(matches!(
        decode_module(&bytes, features),
        Err(Error::Validation(_))
    ));

    decode_module(&bytes, FeatureSpec::standard()).unwrap();
}

#[test]
fn undeclared_ref_func_is_invalid() {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&[0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x70]); // () -> funcref
    bytes.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    // Code: ref.func 0; end -- function 0 is never declared.
    bytes.extend_from_slice(&[0x0A, 0x06, 0x01, 0x04, 0x00, 0xD2, 0x00, 0x0B]);
    match decode_module(&bytes, FeatureSpec::standard()).unwrap_err() {
        Error::Validation(e) => assert!(e.message.contains("undeclared")),
        other => panic!("expected a validation error, got {other}"),
    }
}

#[test]
fn generated_modules_validate_and_round_trip() {
    for seed_byte in 0..32u8 {
        let seed: Vec<u8> = (0..512u32)
            .map(|i| (u32::from(seed_byte).wrapping_mul(2654435761).wrapping_add(i * 97) >> 8) as u8)
            .collect();
        let module = generate_module(&seed, FeatureSpec::standard());
        validate_module(&module).unwrap_or_else(|e| panic!("seed {seed_byte}: {e}"));

        let bytes = encode_module(&module);
        let decoded = decode_module(&bytes, FeatureSpec::standard())
            .unwrap_or_else(|e| panic!("seed {seed_byte}: {e}"));
        // Canonical encodings are a fixed point.
        assert_eq!(encode_module(&decoded), bytes, "seed {seed_byte}");
    }
}

#[test]
fn custom_sections_round_trip_at_their_anchor() {
    let module = generate_module(&[7; 64], FeatureSpec::standard());
    let mut bytes = encode_module(&module);
    // Append a trailing custom section by hand.
    let payload = b"\x04fourdata";
    bytes.push(0x00);
    bytes.push(u8::try_from(payload.len()).unwrap());
    bytes.extend_from_slice(payload);

    let decoded = decode_module(&bytes, FeatureSpec::standard()).unwrap();
    assert_eq!(decoded.custom_sections.len(), 1);
    assert_eq!(decoded.custom_sections[0].name, "four");
    assert_eq!(decoded.custom_sections[0].bytes, b"data");
    assert_eq!(encode_module(&decoded), bytes);
}

#[test]
fn name_section_round_trips() {
    let mut names = DisassemblyNames::default();
    names.module_name = Some("demo".into());
    let mut f0 = FunctionNames::default();
    f0.name = Some("main".into());
    f0.locals.set(LocalIndex::from_u32(0), "x".into());
    names.functions.set(FuncIndex::from_u32(0), f0);
    names.types.set(TypeIndex::from_u32(0), "sig".into());

    let payload = encode_name_section(&names);
    let decoded = decode_name_section(&payload, &FeatureSpec::standard()).unwrap();
    assert_eq!(decoded.module_name.as_deref(), Some("demo"));
    assert_eq!(decoded.function_name(FuncIndex::from_u32(0)), Some("main"));
    assert_eq!(
        decoded.local_name(FuncIndex::from_u32(0), LocalIndex::from_u32(0)),
        Some("x")
    );
    assert_eq!(encode_name_section(&decoded), payload);

    // Extended subsections are gated.
    let mut features = FeatureSpec::standard();
    features.extended_name_section = false;
    assert!(decode_name_section(&payload, &features).is_err());
}
