//! Data model shared by the channel session and the correlation engine.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, ErrorKind, Result};

// =============================================================================
// IDENTIFIER
// =============================================================================

/// Length of a national identifier.
pub const ID_NUMBER_LEN: usize = 8;

/// Check that an identifier is exactly 8 ASCII digits.
pub fn validate_id_number(id_number: &str) -> Result<()> {
    if id_number.len() == ID_NUMBER_LEN && id_number.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::MalformedInput(
            "identifier must be an 8-digit number".to_string(),
        ))
    }
}

/// One logical lookup, owned by the engine call handling it.
#[derive(Debug, Clone)]
pub struct Query {
    pub id_number: String,
    pub correlation_token: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl Query {
    pub fn new(
        id_number: impl Into<String>,
        correlation_token: impl Into<String>,
        budget: std::time::Duration,
    ) -> Self {
        let created_at = Utc::now();
        let budget = Duration::from_std(budget).unwrap_or_else(|_| Duration::zero());
        Self {
            id_number: id_number.into(),
            correlation_token: correlation_token.into(),
            created_at,
            deadline: created_at + budget,
        }
    }
}

// =============================================================================
// CHANNEL MESSAGES
// =============================================================================

/// Kind of attachment carried by a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    Other,
}

/// Opaque reference to an attachment, resolved by the transport on download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn photo(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MediaKind::Photo,
        }
    }
}

/// A message read from the channel. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
}

impl ChannelMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn has_photo(&self) -> bool {
        matches!(
            self.media,
            Some(MediaRef {
                kind: MediaKind::Photo,
                ..
            })
        )
    }
}

// =============================================================================
// EXTRACTED RECORD
// =============================================================================

/// The fixed set of fields the responder labels in its replies.
///
/// Declaration order is the record's iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordField {
    #[serde(rename = "DNI")]
    Dni,
    #[serde(rename = "NOMBRES")]
    Nombres,
    #[serde(rename = "APELLIDOS")]
    Apellidos,
    #[serde(rename = "GENERO")]
    Genero,
    #[serde(rename = "FECHA_NACIMIENTO")]
    FechaNacimiento,
    #[serde(rename = "EDAD")]
    Edad,
    #[serde(rename = "DEPARTAMENTO")]
    Departamento,
    #[serde(rename = "PROVINCIA")]
    Provincia,
    #[serde(rename = "DISTRITO")]
    Distrito,
    #[serde(rename = "NIVEL_EDUCATIVO")]
    NivelEducativo,
    #[serde(rename = "ESTADO_CIVIL")]
    EstadoCivil,
    #[serde(rename = "ESTATURA")]
    Estatura,
    #[serde(rename = "FECHA_INSCRIPCION")]
    FechaInscripcion,
    #[serde(rename = "FECHA_EMISION")]
    FechaEmision,
    #[serde(rename = "FECHA_CADUCIDAD")]
    FechaCaducidad,
    #[serde(rename = "DONANTE_ORGANOS")]
    DonanteOrganos,
    #[serde(rename = "PADRE")]
    Padre,
    #[serde(rename = "MADRE")]
    Madre,
    #[serde(rename = "RESTRICCION")]
    Restriccion,
    #[serde(rename = "DIRECCION")]
    Direccion,
    #[serde(rename = "UBIGEO_RENIEC")]
    UbigeoReniec,
    #[serde(rename = "UBIGEO_INE")]
    UbigeoIne,
    #[serde(rename = "UBIGEO_SUNAT")]
    UbigeoSunat,
}

impl RecordField {
    pub const ALL: [RecordField; 23] = [
        RecordField::Dni,
        RecordField::Nombres,
        RecordField::Apellidos,
        RecordField::Genero,
        RecordField::FechaNacimiento,
        RecordField::Edad,
        RecordField::Departamento,
        RecordField::Provincia,
        RecordField::Distrito,
        RecordField::NivelEducativo,
        RecordField::EstadoCivil,
        RecordField::Estatura,
        RecordField::FechaInscripcion,
        RecordField::FechaEmision,
        RecordField::FechaCaducidad,
        RecordField::DonanteOrganos,
        RecordField::Padre,
        RecordField::Madre,
        RecordField::Restriccion,
        RecordField::Direccion,
        RecordField::UbigeoReniec,
        RecordField::UbigeoIne,
        RecordField::UbigeoSunat,
    ];

    /// Label as printed by the responder.
    pub fn label(&self) -> &'static str {
        match self {
            RecordField::Dni => "DNI",
            RecordField::Nombres => "NOMBRES",
            RecordField::Apellidos => "APELLIDOS",
            RecordField::Genero => "GENERO",
            RecordField::FechaNacimiento => "FECHA NACIMIENTO",
            RecordField::Edad => "EDAD",
            RecordField::Departamento => "DEPARTAMENTO",
            RecordField::Provincia => "PROVINCIA",
            RecordField::Distrito => "DISTRITO",
            RecordField::NivelEducativo => "NIVEL EDUCATIVO",
            RecordField::EstadoCivil => "ESTADO CIVIL",
            RecordField::Estatura => "ESTATURA",
            RecordField::FechaInscripcion => "FECHA INSCRIPCION",
            RecordField::FechaEmision => "FECHA EMISION",
            RecordField::FechaCaducidad => "FECHA CADUCIDAD",
            RecordField::DonanteOrganos => "DONANTE ORGANOS",
            RecordField::Padre => "PADRE",
            RecordField::Madre => "MADRE",
            RecordField::Restriccion => "RESTRICCION",
            RecordField::Direccion => "DIRECCION",
            RecordField::UbigeoReniec => "UBIGEO RENIEC",
            RecordField::UbigeoIne => "UBIGEO INE",
            RecordField::UbigeoSunat => "UBIGEO SUNAT",
        }
    }
}

/// Ordered field → value mapping. Partial records are normal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedRecord {
    fields: BTreeMap<RecordField, String>,
}

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: RecordField, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    pub fn get(&self, field: RecordField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordField, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

// =============================================================================
// IMAGE ARTIFACTS
// =============================================================================

/// Category assigned by the (best-effort) image classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageCategory {
    Face,
    Fingerprint,
    Signature,
}

impl ImageCategory {
    /// Ordinal fallback keyed on how many artifacts were already collected.
    pub fn from_ordinal(artifact_count: usize) -> Self {
        match artifact_count {
            0 => ImageCategory::Face,
            1 => ImageCategory::Signature,
            _ => ImageCategory::Fingerprint,
        }
    }
}

fn serialize_base64<S: Serializer>(
    data: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// A classified image, owned by the result returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageArtifact {
    pub category: ImageCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "base64", serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
}

impl ImageArtifact {
    pub fn new(category: ImageCategory, data: Vec<u8>) -> Self {
        let mime_type = infer::get(&data).map(|kind| kind.mime_type().to_string());
        Self {
            category,
            mime_type,
            data,
        }
    }
}

// =============================================================================
// QUERY RESULT
// =============================================================================

/// Outcome of a lookup. Every code path ends in one of these.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub id_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ExtractedRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QueryResult {
    pub fn success(
        id_number: impl Into<String>,
        correlation_token: impl Into<String>,
        record: ExtractedRecord,
        images: Vec<ImageArtifact>,
    ) -> Self {
        Self {
            success: true,
            id_number: id_number.into(),
            correlation_token: Some(correlation_token.into()),
            record: Some(record),
            images,
            error_kind: None,
            message: None,
        }
    }

    pub fn failure(
        id_number: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            id_number: id_number.into(),
            correlation_token: None,
            record: None,
            images: Vec::new(),
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    /// Build a failure from an engine error. Errors without a caller-visible
    /// kind are reported as channel errors.
    pub fn from_error(id_number: impl Into<String>, err: &Error) -> Self {
        let kind = err.kind().unwrap_or(ErrorKind::ChannelError);
        Self::failure(id_number, kind, err.to_string())
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.correlation_token = Some(token.into());
        self
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Channel session state machine. Only `Ready` admits new queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    /// Connected but the last keep-alive failed.
    Degraded,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_number_accepts_eight_digits() {
        assert!(validate_id_number("12345678").is_ok());
        assert!(validate_id_number("00000000").is_ok());
    }

    #[test]
    fn test_validate_id_number_rejects_bad_shapes() {
        for bad in ["", "1234567", "123456789", "1234567a", "１２３４５６７８", " 1234567"] {
            let err = validate_id_number(bad).unwrap_err();
            assert_eq!(err.kind(), Some(ErrorKind::MalformedInput), "input {:?}", bad);
        }
    }

    #[test]
    fn test_query_deadline_follows_budget() {
        let q = Query::new("12345678", "abcd1234", std::time::Duration::from_secs(30));
        assert_eq!(q.deadline - q.created_at, Duration::seconds(30));
    }

    #[test]
    fn test_record_field_keys_use_underscores() {
        for field in RecordField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            assert!(!json.contains(' '), "{:?}", field);
            assert_eq!(json.replace('_', " "), format!("\"{}\"", field.label()));
        }
    }

    #[test]
    fn test_record_serializes_in_enumeration_order() {
        let mut record = ExtractedRecord::new();
        record.insert(RecordField::Apellidos, "PEREZ");
        record.insert(RecordField::Dni, "12345678");
        record.insert(RecordField::Nombres, "JUAN");

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"DNI":"12345678","NOMBRES":"JUAN","APELLIDOS":"PEREZ"}"#
        );
    }

    #[test]
    fn test_ordinal_fallback() {
        assert_eq!(ImageCategory::from_ordinal(0), ImageCategory::Face);
        assert_eq!(ImageCategory::from_ordinal(1), ImageCategory::Signature);
        assert_eq!(ImageCategory::from_ordinal(2), ImageCategory::Fingerprint);
        assert_eq!(ImageCategory::from_ordinal(3), ImageCategory::Fingerprint);
    }

    #[test]
    fn test_artifact_serializes_base64_payload() {
        let artifact = ImageArtifact::new(ImageCategory::Signature, b"abc".to_vec());
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["category"], "SIGNATURE");
        assert_eq!(json["base64"], "YWJj");
        assert!(json.get("mime_type").is_none());
    }

    #[test]
    fn test_artifact_sniffs_png_mime() {
        let mut data = vec![0u8; 32];
        data[0..8].copy_from_slice(b"\x89PNG\r\n\x1a\n");
        let artifact = ImageArtifact::new(ImageCategory::Face, data);
        assert_eq!(artifact.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_failure_result_shape() {
        let result = QueryResult::failure("12345678", ErrorKind::Timeout, "no reply");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "TIMEOUT");
        assert_eq!(json["message"], "no reply");
        assert!(json.get("record").is_none());
        assert!(json.get("images").is_none());
    }

    #[test]
    fn test_from_error_defaults_to_channel_error() {
        let result = QueryResult::from_error("12345678", &Error::Internal("boom".into()));
        assert_eq!(result.error_kind, Some(ErrorKind::ChannelError));
    }

    #[test]
    fn test_channel_message_photo_detection() {
        let mut msg = ChannelMessage {
            id: 1,
            timestamp: Utc::now(),
            sender: "bot".into(),
            text: None,
            media: Some(MediaRef::photo("m1")),
        };
        assert!(msg.has_photo());
        assert_eq!(msg.text(), "");

        msg.media = Some(MediaRef {
            id: "m2".into(),
            kind: MediaKind::Document,
        });
        assert!(!msg.has_photo());
    }

    #[test]
    fn test_only_ready_state_is_ready() {
        assert!(SessionState::Ready.is_ready());
        assert!(!SessionState::Degraded.is_ready());
        assert!(!SessionState::Connecting.is_ready());
        assert!(!SessionState::Disconnected.is_ready());
    }
}
