//! Short random identifiers for stored records.

use uuid::Uuid;

/// Length of execution and chain identifiers.
pub const SHORT_ID_LEN: usize = 8;
/// Length of run identifiers.
pub const RUN_ID_LEN: usize = 12;

/// Leading `len` characters of a hyphenated v4 UUID.
pub fn short_id(len: usize) -> String {
    let mut id = Uuid::new_v4().hyphenated().to_string();
    id.truncate(len);
    id
}

pub fn new_execution_id() -> String {
    short_id(SHORT_ID_LEN)
}

pub fn new_chain_id() -> String {
    short_id(SHORT_ID_LEN)
}

pub fn new_run_id() -> String {
    short_id(RUN_ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_expected_lengths() {
        assert_eq!(new_execution_id().len(), 8);
        assert_eq!(new_chain_id().len(), 8);
        let run_id = new_run_id();
        assert_eq!(run_id.len(), 12);
        assert_eq!(run_id.as_bytes()[8], b'-');
    }

    #[test]
    fn ids_are_distinct() {
        assert_ne!(new_run_id(), new_run_id());
    }
}
