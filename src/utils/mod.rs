pub mod env_guard;
pub mod error;

pub use error::compact_error_message;

/// Formats a block number as a JSON-RPC quantity tag.
pub fn block_tag(block_number: u64) -> String {
    format!("0x{block_number:x}")
}

#[cfg(test)]
mod tests {
    use super::block_tag;

    #[test]
    fn test_block_tag_is_lowercase_hex_quantity() {
        assert_eq!(block_tag(0), "0x0");
        assert_eq!(block_tag(29_652_208), "0x1c474f0");
    }
}
