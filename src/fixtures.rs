//! Canonical values for tests that drive the authentication client.

use uuid::Uuid;

pub const TEST_AUTHORITY: &str = "https://login.windows.net/contoso.com";
pub const TEST_REDIRECT_URL: &str = "urn:ietf:wg:oauth:2.0:oob";
pub const TEST_RESOURCE: &str = "resource";
pub const TEST_USER_ID: &str = "eric_cartman@contoso.com";
pub const TEST_CLIENT_ID: &str = "c3c7f5e5-7153-44d4-90e6-329686d48d76";
pub const TEST_ACCESS_TOKEN: &str = "access token";
pub const TEST_ACCESS_TOKEN_TYPE: &str = "access token type";
pub const TEST_REFRESH_TOKEN: &str = "refresh token";
pub const TEST_CORRELATION_ID: Uuid = Uuid::from_u128(0x6fd1f5cd_a94c_4335_889b_6c598e6d8048);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_matches_its_text_form() {
        assert_eq!(
            TEST_CORRELATION_ID.to_string(),
            "6fd1f5cd-a94c-4335-889b-6c598e6d8048"
        );
        assert!(Uuid::parse_str(TEST_CLIENT_ID).is_ok());
    }
}
