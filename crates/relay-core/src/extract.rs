//! Field extraction from the responder's free-text replies.
//!
//! Each field is matched independently as `LABEL <sep> value` on a single
//! line. Missing fields are omitted; nothing here can fail.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ExtractedRecord, RecordField};

/// Separator glyphs the responder puts between a label and its value.
pub const SEPARATORS: &str = "➾=:-";

/// Unit appended to the age field.
pub const AGE_UNIT: &str = "AÑOS";

/// Horizontal whitespace only, so a match never spills onto the next line.
const HSPACE: &str = r"[^\S\r\n]*";

fn separator_class() -> String {
    format!("[{}]", regex::escape(SEPARATORS))
}

/// Regex source for `label <sep> value` on one line, where `value` is a raw
/// regex fragment. Shared with the anchor matcher so both agree on what a
/// labeled line looks like.
pub fn labeled_pattern(label: &str, value: &str) -> String {
    format!(
        r"\b{label}{hs}{sep}{hs}{value}",
        label = regex::escape(label),
        hs = HSPACE,
        sep = separator_class(),
        value = value,
    )
}

static FIELD_PATTERNS: Lazy<Vec<(RecordField, Regex)>> = Lazy::new(|| {
    RecordField::ALL
        .iter()
        .map(|field| {
            let value = match field {
                RecordField::Dni | RecordField::Edad => "([0-9]+)",
                _ => r"([^\r\n]*)",
            };
            let re = Regex::new(&labeled_pattern(field.label(), value))
                .expect("field patterns are built from escaped constant labels");
            (*field, re)
        })
        .collect()
});

/// Remove inline emphasis markers (`**bold**`, `*em*`, `` `code` ``).
pub fn strip_markup(text: &str) -> String {
    text.replace("**", "").replace(['`', '*'], "")
}

/// Parse a reply into an [`ExtractedRecord`].
pub fn extract_fields(text: &str) -> ExtractedRecord {
    let clean = strip_markup(text);
    let mut record = ExtractedRecord::new();

    for (field, re) in FIELD_PATTERNS.iter() {
        let Some(value) = re
            .captures(&clean)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
        else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        match field {
            RecordField::Edad => record.insert(*field, format!("{} {}", value, AGE_UNIT)),
            _ => record.insert(*field, value),
        }
    }

    tracing::trace!(field_count = record.len(), "Extracted reply fields");
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_REPLY: &str = "\
**[#OLIMPO_BOT]** ➾ RENIEC ONLINE
DNI ➾ 12345678 - 5
NOMBRES ➾ JUAN CARLOS
APELLIDOS ➾ PEREZ GOMEZ
GENERO ➾ MASCULINO
FECHA NACIMIENTO ➾ 01/02/1990
EDAD ➾ 35 AÑOS
DEPARTAMENTO ➾ LIMA
PROVINCIA ➾ LIMA
DISTRITO ➾ MIRAFLORES
NIVEL EDUCATIVO ➾ SUPERIOR
ESTADO CIVIL ➾ SOLTERO
ESTATURA ➾ 1.72
FECHA INSCRIPCION ➾ 05/03/2008
FECHA EMISION ➾ 10/10/2020
FECHA CADUCIDAD ➾ 10/10/2028
DONANTE ORGANOS ➾ SI
PADRE ➾ PEDRO
MADRE ➾ MARIA
RESTRICCION ➾ NINGUNA
DIRECCION ➾ AV. LARCO 123
UBIGEO RENIEC ➾ 140122
UBIGEO INE ➾ 150122
UBIGEO SUNAT ➾ 150122";

    #[test]
    fn test_basic_scenario() {
        let record = extract_fields("DNI ➾ 12345678\nNOMBRES ➾ JUAN\nAPELLIDOS ➾ PEREZ");
        assert_eq!(record.len(), 3);
        assert_eq!(record.get(RecordField::Dni), Some("12345678"));
        assert_eq!(record.get(RecordField::Nombres), Some("JUAN"));
        assert_eq!(record.get(RecordField::Apellidos), Some("PEREZ"));
    }

    #[test]
    fn test_full_reply_extracts_every_field() {
        let record = extract_fields(FULL_REPLY);
        assert_eq!(record.len(), RecordField::ALL.len());
        assert_eq!(record.get(RecordField::Dni), Some("12345678"));
        assert_eq!(record.get(RecordField::FechaNacimiento), Some("01/02/1990"));
        assert_eq!(record.get(RecordField::Edad), Some("35 AÑOS"));
        assert_eq!(record.get(RecordField::Direccion), Some("AV. LARCO 123"));
        assert_eq!(record.get(RecordField::UbigeoReniec), Some("140122"));
        assert_eq!(record.get(RecordField::UbigeoIne), Some("150122"));
    }

    #[test]
    fn test_bare_number_yields_empty_record() {
        assert!(extract_fields("12345678").is_empty());
    }

    #[test]
    fn test_arbitrary_text_never_panics() {
        for text in ["", "\n\n", "➾➾➾", "DNI", "DNI ➾", "ÑÑÑ ** ` *", "\u{0}\u{ffff}", "EDAD ➾ muchos"] {
            let _ = extract_fields(text);
        }
        assert!(extract_fields("DNI ➾").is_empty());
        assert!(extract_fields("EDAD ➾ muchos").get(RecordField::Edad).is_none());
    }

    #[test]
    fn test_idempotent() {
        assert_eq!(extract_fields(FULL_REPLY), extract_fields(FULL_REPLY));
    }

    #[test]
    fn test_line_order_does_not_matter() {
        let mut lines: Vec<&str> = FULL_REPLY.lines().collect();
        let forward = extract_fields(&lines.join("\n"));
        lines.reverse();
        let reversed = extract_fields(&lines.join("\n"));
        lines.rotate_left(7);
        let rotated = extract_fields(&lines.join("\n"));
        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
    }

    #[test]
    fn test_markup_is_stripped() {
        let record = extract_fields("**NOMBRES** ➾ `JUAN`\n*APELLIDOS* ➾ **PEREZ**");
        assert_eq!(record.get(RecordField::Nombres), Some("JUAN"));
        assert_eq!(record.get(RecordField::Apellidos), Some("PEREZ"));
    }

    #[test]
    fn test_all_separators_accepted() {
        for sep in ["➾", "=", ":", "-"] {
            let record = extract_fields(&format!("NOMBRES {} ANA", sep));
            assert_eq!(record.get(RecordField::Nombres), Some("ANA"), "sep {}", sep);
        }
    }

    #[test]
    fn test_label_match_is_case_sensitive() {
        assert!(extract_fields("nombres ➾ ANA").is_empty());
        assert!(extract_fields("Nombres ➾ ANA").is_empty());
    }

    #[test]
    fn test_label_must_be_a_whole_word() {
        assert!(extract_fields("COMPADRE ➾ LUIS").get(RecordField::Padre).is_none());
    }

    #[test]
    fn test_empty_value_does_not_swallow_next_line() {
        let record = extract_fields("NOMBRES ➾ \nAPELLIDOS ➾ PEREZ");
        assert!(record.get(RecordField::Nombres).is_none());
        assert_eq!(record.get(RecordField::Apellidos), Some("PEREZ"));
    }

    #[test]
    fn test_age_gets_unit_even_without_suffix() {
        let record = extract_fields("EDAD ➾ 42");
        assert_eq!(record.get(RecordField::Edad), Some("42 AÑOS"));
        let record = extract_fields("EDAD ➾ 1 AÑO");
        assert_eq!(record.get(RecordField::Edad), Some("1 AÑOS"));
    }

    #[test]
    fn test_values_are_trimmed() {
        let record = extract_fields("DIRECCION ➾    JR. UNION 45   \r\n");
        assert_eq!(record.get(RecordField::Direccion), Some("JR. UNION 45"));
    }

    #[test]
    fn test_ubigeo_labels_do_not_collide() {
        let record = extract_fields("UBIGEO INE ➾ 1\nUBIGEO SUNAT ➾ 2\nUBIGEO RENIEC ➾ 3");
        assert_eq!(record.get(RecordField::UbigeoIne), Some("1"));
        assert_eq!(record.get(RecordField::UbigeoSunat), Some("2"));
        assert_eq!(record.get(RecordField::UbigeoReniec), Some("3"));
    }
}
