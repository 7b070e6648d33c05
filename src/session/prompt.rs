/// Marker the device shell prints when it is ready for input.
pub const READY_PROMPT: &str = ">:";

/// True iff the accumulated text contains the ready prompt anywhere.
///
/// Only the connect handshake and other prompt-awaiting exchanges call
/// this. Data-bearing responses complete on settle delays instead, so
/// file content that happens to contain the marker cannot cut a
/// response short.
pub fn contains_ready_prompt(text: &str) -> bool {
    text.contains(READY_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_prompt_at_end() {
        assert!(contains_ready_prompt("storage list /ext\r\n>: "));
    }

    #[test]
    fn detects_prompt_mid_text() {
        assert!(contains_ready_prompt("banner\r\n>: storage"));
    }

    #[test]
    fn rejects_partial_marker() {
        assert!(!contains_ready_prompt(""));
        assert!(!contains_ready_prompt(">"));
        assert!(!contains_ready_prompt(": >"));
    }
}
