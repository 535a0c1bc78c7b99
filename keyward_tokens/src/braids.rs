use aliri_braid::braid;
use std::fmt;

/// Implements redacting `Debug` and `Display` for a borrowed credential braid
///
/// Both print a placeholder. The alternate forms reveal the credential: `{:#}`
/// in full, `{:#?}` quoted and cut to `reveal` characters (or the given
/// width).
macro_rules! redacted {
    ($ty:ty, $label:literal, reveal = $reveal:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                f.write_str("\"")?;
                write_prefix(self.as_str(), f, $reveal)?;
                f.write_str("\"")
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                f.write_str(self.as_str())
            }
        }
    };
}

/// Writes at most `limit` characters of `secret`, ending in `…` when cut short
fn write_prefix(secret: &str, f: &mut fmt::Formatter<'_>, default_limit: usize) -> fmt::Result {
    let limit = f.width().unwrap_or(default_limit).max(1);
    if secret.char_indices().nth(limit).is_none() {
        return f.write_str(secret);
    }

    let end = secret
        .char_indices()
        .nth(limit - 1)
        .map_or(0, |(idx, _)| idx);
    f.write_str(&secret[..end])?;
    f.write_str("…")
}

/// A short-lived access credential, attached to outbound requests
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef, "ACCESS TOKEN", reveal = 15);

/// A longer-lived refresh credential, used only to obtain a new credential pair
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef, "REFRESH TOKEN", reveal = 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let token = AccessTokenRef::from_str("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = RefreshTokenRef::from_str("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(format!("{:#?}", token), "\"abcd…\"");
        assert_eq!(format!("{:#6?}", token), "\"abcde…\"");
    }

    #[test]
    fn short_credentials_are_revealed_whole() {
        let token = AccessTokenRef::from_str("abc");
        assert_eq!(format!("{:#?}", token), "\"abc\"");
        assert_eq!(format!("{:#}", token), "abc");
    }
}
