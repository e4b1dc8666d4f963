//! Configuration validation

use super::schema::{Config, FilterConfig, RecorderSection};
use crate::error::{Result, ValidationError};
use ipnet::{Ipv4Net, Ipv6Net};

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate entire configuration
    pub fn validate(config: &Config) -> Result<()> {
        if let Some(recorder) = &config.recorder {
            Self::validate_recorder(recorder)?;
        }
        Self::validate_patterns(&config.filter)?;
        Self::validate_ranges(&config.filter)?;
        Ok(())
    }

    /// Destination and flush mode must resolve
    fn validate_recorder(recorder: &RecorderSection) -> Result<()> {
        recorder.to_recorder_config()?;
        Ok(())
    }

    /// Validate wildcard patterns
    fn validate_patterns(filter: &FilterConfig) -> Result<()> {
        let lists = [
            ("ignore_hosts", &filter.ignore_hosts),
            ("include_hosts", &filter.include_hosts),
        ];
        for (list, patterns) in lists {
            for pattern in patterns {
                let invalid = pattern.is_empty()
                    || pattern.contains("**")
                    || pattern.contains('\0')
                    || pattern.contains('\n')
                    || pattern.contains(char::is_whitespace);
                if invalid {
                    return Err(ValidationError::InvalidPattern {
                        pattern: format!("{:?} in {}", pattern, list),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Validate CIDR ranges
    fn validate_ranges(filter: &FilterConfig) -> Result<()> {
        for cidr in &filter.ignore_ipv4_ranges {
            if cidr.parse::<Ipv4Net>().is_err() {
                return Err(ValidationError::InvalidCidr { cidr: cidr.clone() }.into());
            }
        }
        for cidr in &filter.ignore_ipv6_ranges {
            if cidr.parse::<Ipv6Net>().is_err() {
                return Err(ValidationError::InvalidCidr { cidr: cidr.clone() }.into());
            }
        }
        Ok(())
    }
}
