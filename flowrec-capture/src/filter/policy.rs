//! Filtering policy deciding which flows are recorded

use super::matcher::HostMatcher;
use crate::config::schema::FilterConfig;
use crate::config::ConfigLoader;
use crate::error::{Result, ValidationError};
use flowrec_core::FlowRecord;
use ipnet::{Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::IpAddr;

/// Outcome of running a flow through the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Record,
    Errored,
    NoResponse,
    IgnoredHost,
    IgnoredAddress,
}

impl FilterDecision {
    pub fn is_record(&self) -> bool {
        *self == FilterDecision::Record
    }
}

impl fmt::Display for FilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterDecision::Record => "record",
            FilterDecision::Errored => "flow errored",
            FilterDecision::NoResponse => "no response",
            FilterDecision::IgnoredHost => "host ignored",
            FilterDecision::IgnoredAddress => "server address ignored",
        };
        f.write_str(s)
    }
}

/// Predicate run in front of the recorder
///
/// Host patterns use "more specific wins": when both an ignore and an
/// include pattern match, the one with more literal labels decides, and
/// ignore wins a tie. Host matches take precedence over address ranges.
#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    ignore: HostMatcher,
    include: HostMatcher,
}

impl FlowFilter {
    /// Filter that records every complete flow
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Filter built from the embedded default ignore list
    pub fn builtin() -> Result<Self> {
        let config = ConfigLoader::load_builtin()?;
        Self::from_config(&config.filter)
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut ignore = HostMatcher::new();
        let mut include = HostMatcher::new();

        for host in &config.ignore_hosts {
            ignore.add_pattern(host);
        }
        for host in &config.include_hosts {
            include.add_pattern(host);
        }
        for range in &config.ignore_ipv4_ranges {
            let net = range
                .parse::<Ipv4Net>()
                .map_err(|_| ValidationError::InvalidCidr { cidr: range.clone() })?;
            ignore.add_ipv4_range(net);
        }
        for range in &config.ignore_ipv6_ranges {
            let net = range
                .parse::<Ipv6Net>()
                .map_err(|_| ValidationError::InvalidCidr { cidr: range.clone() })?;
            ignore.add_ipv6_range(net);
        }

        Ok(Self { ignore, include })
    }

    /// Decide from request metadata alone
    pub fn check_host(&self, host: &str, ip: Option<IpAddr>) -> FilterDecision {
        let ignore_spec = self.ignore.matches_with_specificity(host);
        let include_spec = self.include.matches_with_specificity(host);

        match (include_spec, ignore_spec) {
            (Some(include), Some(ignore)) if include > ignore => return FilterDecision::Record,
            (Some(_), None) => return FilterDecision::Record,
            (_, Some(_)) => return FilterDecision::IgnoredHost,
            (None, None) => {}
        }

        if ip.is_some_and(|addr| self.ignore.matches_ip(addr)) {
            return FilterDecision::IgnoredAddress;
        }
        FilterDecision::Record
    }

    /// Full decision for a completed flow
    pub fn decide(&self, flow: &FlowRecord) -> FilterDecision {
        if flow.error.is_some() {
            return FilterDecision::Errored;
        }
        if flow.response.is_none() {
            return FilterDecision::NoResponse;
        }
        self.check_host(flow.host(), flow.server_addr.map(|a| a.ip()))
    }

    pub fn should_record(&self, flow: &FlowRecord) -> bool {
        self.decide(flow).is_record()
    }
}
