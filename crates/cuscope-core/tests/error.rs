//! Tests for error handling

use cuscope_core::error::{CuscopeError, DwarfError, UnitError};

#[test]
fn test_out_of_bounds_display()
{
    let error = DwarfError::OutOfBounds {
        offset: 0x10,
        len: 4,
        region_len: 18,
    };
    let message = format!("{}", error);
    assert!(message.contains("0x10"));
    assert!(message.contains("18"));
}

#[test]
fn test_missing_section_display()
{
    let message = DwarfError::MissingSection(".debug_ranges").to_string();
    assert_eq!(message, "Section .debug_ranges is not present");
}

#[test]
fn test_unit_error_display_and_source()
{
    let error = UnitError::new(0x2c, DwarfError::UnterminatedChildren(0x37));
    assert_eq!(
        error.to_string(),
        "Unit at offset 0x2c: Children of DIE at offset 0x37 are not terminated before the end of the unit"
    );

    let source = std::error::Error::source(&error).map(ToString::to_string);
    assert_eq!(source, Some(DwarfError::UnterminatedChildren(0x37).to_string()));

    let inner: DwarfError = error.into();
    assert_eq!(inner, DwarfError::UnterminatedChildren(0x37));
}

#[test]
fn test_cuscope_error_conversions()
{
    let dwarf: CuscopeError = DwarfError::Leb128Overflow(3).into();
    match dwarf {
        CuscopeError::Dwarf(DwarfError::Leb128Overflow(3)) => {}
        other => panic!("Expected Dwarf variant, got {other:?}"),
    }

    let io: CuscopeError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
    assert!(matches!(io, CuscopeError::Io(_)));
    assert!(io.to_string().contains("missing"));

    let unit: CuscopeError = UnitError::new(0, DwarfError::MissingSection(".debug_abbrev")).into();
    assert_eq!(unit.to_string(), "Unit at offset 0x0: Section .debug_abbrev is not present");
}

#[test]
fn test_invalid_container_display()
{
    let error = CuscopeError::InvalidContainer("bad magic".to_string());
    assert_eq!(error.to_string(), "Invalid container: bad magic");
}
