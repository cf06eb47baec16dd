//! Structured logging conventions for relay.
//!
//! Events carry `subsystem` and `op` on their spans, `token` for the
//! advisory correlation token, and `id_number` only through [`mask_id`].
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (connect, restart), lookup completions |
//! | DEBUG | Decision points (anchor match, artifact classification) |
//! | TRACE | Per-message iteration during scans |

/// Mask a national identifier for logs, keeping the first four digits.
pub fn mask_id(id_number: &str) -> String {
    let visible: String = id_number.chars().take(4).collect();
    let hidden = id_number.chars().count().saturating_sub(4);
    format!("{}{}", visible, "*".repeat(hidden))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_id_hides_tail() {
        assert_eq!(mask_id("12345678"), "1234****");
    }

    #[test]
    fn test_mask_id_short_input() {
        assert_eq!(mask_id("12"), "12");
        assert_eq!(mask_id(""), "");
    }
}
