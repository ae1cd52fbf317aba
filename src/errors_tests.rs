// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the provider error taxonomy.

#[cfg(test)]
mod tests {
    use crate::errors::ProviderError;

    #[test]
    fn test_busy_message_format() {
        let err = ProviderError::Busy {
            name: "app.example.com".to_string(),
            owner: "other".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "dns name app.example.com already busy for owner other"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transience_classification() {
        assert!(ProviderError::Throttled {
            message: "Rate exceeded".to_string()
        }
        .is_transient());
        assert!(ProviderError::Transient {
            message: "connection reset".to_string()
        }
        .is_transient());
        assert!(ProviderError::Conflict {
            name: "a.example.com".to_string(),
            message: "already exists".to_string()
        }
        .is_transient());

        assert!(!ProviderError::Invalid {
            name: "a.example.com".to_string(),
            reason: "bad target".to_string()
        }
        .is_transient());
        assert!(!ProviderError::Fatal {
            message: "invalid credentials".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_throttle_sentinel() {
        let err = ProviderError::Throttled {
            message: "Rate exceeded".to_string(),
        };
        assert!(err.is_throttled());
        assert_eq!(err.status_reason(), "Throttled");
    }

    #[test]
    fn test_http_status_classification() {
        assert!(ProviderError::from_http_status(429, "n", "slow down").is_throttled());
        assert!(matches!(
            ProviderError::from_http_status(409, "n", "exists"),
            ProviderError::Conflict { .. }
        ));
        assert!(matches!(
            ProviderError::from_http_status(403, "n", "denied"),
            ProviderError::Fatal { .. }
        ));
        assert!(matches!(
            ProviderError::from_http_status(400, "n", "bad"),
            ProviderError::Invalid { .. }
        ));
        assert!(matches!(
            ProviderError::from_http_status(503, "n", "unavailable"),
            ProviderError::Transient { .. }
        ));
    }

    #[test]
    fn test_status_reasons_are_stable() {
        let cases = [
            (
                ProviderError::Throttled {
                    message: String::new(),
                },
                "Throttled",
            ),
            (
                ProviderError::Busy {
                    name: "a".to_string(),
                    owner: "b".to_string(),
                },
                "Busy",
            ),
            (
                ProviderError::ForbiddenZone {
                    domain: "x.com".to_string(),
                    message: String::new(),
                },
                "ForbiddenZone",
            ),
        ];
        for (err, reason) in cases {
            assert_eq!(err.status_reason(), reason);
        }
    }
}
