use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("Email address must contain exactly one '@': {0}")]
    AtSign(String),
    #[error("Email address has an empty local part: {0}")]
    EmptyLocalPart(String),
    #[error("Email address has an empty domain: {0}")]
    EmptyDomain(String),
    #[error("Email address contains a control character, whitespace or angle bracket: {0:?}")]
    InvalidCharacter(String),
}

fn forbidden(c: char) -> bool {
    c.is_control() || c.is_whitespace() || c == '<' || c == '>'
}

/// A candidate address split into its local part and lower-cased domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub local_part: String,
    pub domain: String,
}

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, EmailError> {
        let raw = raw.trim();
        let mut parts = raw.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => (local.trim(), domain.trim()),
            _ => return Err(EmailError::AtSign(raw.to_string())),
        };

        if local.is_empty() {
            return Err(EmailError::EmptyLocalPart(raw.to_string()));
        }
        if domain.is_empty() {
            return Err(EmailError::EmptyDomain(raw.to_string()));
        }
        if local.chars().any(forbidden) || domain.chars().any(forbidden) {
            return Err(EmailError::InvalidCharacter(raw.to_string()));
        }

        Ok(Self {
            local_part: local.to_string(),
            domain: domain.to_lowercase(),
        })
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lowercases_domain_only() {
        let email = EmailAddress::parse("John.Doe@Example.COM").unwrap();
        assert_eq!(email.local_part, "John.Doe");
        assert_eq!(email.domain, "example.com");
        assert_eq!(email.to_string(), "John.Doe@example.com");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            EmailAddress::parse("no-at-sign"),
            Err(EmailError::AtSign(_))
        ));
        assert!(matches!(
            EmailAddress::parse("a@b@c.com"),
            Err(EmailError::AtSign(_))
        ));
        assert!(matches!(
            EmailAddress::parse("@example.com"),
            Err(EmailError::EmptyLocalPart(_))
        ));
        assert!(matches!(
            EmailAddress::parse("user@"),
            Err(EmailError::EmptyDomain(_))
        ));
    }

    #[test]
    fn test_parse_rejects_smtp_command_injection() {
        let injected = "x>\r\nDATA\r\nSubject: hi\r\n\r\nbody\r\n.\r\nRCPT TO:<y@example.com";
        assert!(matches!(
            EmailAddress::parse(injected),
            Err(EmailError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn test_parse_rejects_forbidden_characters() {
        for raw in [
            "us er@example.com",
            "user@exa mple.com",
            "us\ter@example.com",
            "user@example.com\r\nQUIT",
            "<user@example.com",
            "user@example.com>",
            "user\u{0}@example.com",
        ] {
            assert!(
                matches!(EmailAddress::parse(raw), Err(EmailError::InvalidCharacter(_))),
                "{raw:?} should be rejected"
            );
        }
        assert!(EmailAddress::parse("  first.last+tag@example.com  ").is_ok());
    }
}
