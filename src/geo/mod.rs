use std::net::IpAddr;
use std::path::Path;

struct IpRange {
    start: u32,
    end: u32,
    country: String,
}

/// Country lookup over a static IP-range dataset. Lookups return `None` on
/// any miss or parse problem, never an error - the fraud engine treats an
/// unresolvable IP as "no signal".
pub struct GeoResolver {
    ranges: Vec<IpRange>,
}

impl GeoResolver {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Loads a `start,end,country` CSV (dotted-quad or integer addresses).
    /// Malformed lines are skipped with a warning so one bad row in the
    /// dataset doesn't take the service down.
    pub fn from_csv_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let resolver = Self::from_csv(&raw);
        tracing::info!(
            ranges = resolver.ranges.len(),
            path = %path.as_ref().display(),
            "Geo dataset loaded"
        );
        Ok(resolver)
    }

    pub fn from_csv(raw: &str) -> Self {
        let mut ranges: Vec<IpRange> = raw
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.splitn(3, ',');
                let start = parse_ipv4(parts.next()?.trim())?;
                let end = parse_ipv4(parts.next()?.trim())?;
                let country = parts.next()?.trim().to_uppercase();
                if country.len() != 2 || end < start {
                    tracing::warn!(line, "Skipping malformed geo dataset row");
                    return None;
                }
                Some(IpRange { start, end, country })
            })
            .collect();

        ranges.sort_by_key(|r| r.start);
        Self { ranges }
    }

    pub fn resolve_country(&self, ip: IpAddr) -> Option<String> {
        let addr = match ip {
            IpAddr::V4(v4) => u32::from(v4),
            // dataset is IPv4-only; v6 callers just get no signal
            IpAddr::V6(_) => return None,
        };

        let idx = self.ranges.partition_point(|r| r.start <= addr);
        if idx == 0 {
            return None;
        }
        let candidate = &self.ranges[idx - 1];
        (addr <= candidate.end).then(|| candidate.country.clone())
    }

    /// The VPN-mismatch primitive. An unresolvable IP country is never a
    /// mismatch - only a positive disagreement counts.
    pub fn countries_mismatch(ip_country: Option<&str>, network_country: &str) -> bool {
        match ip_country {
            Some(ip_cc) => !ip_cc.eq_ignore_ascii_case(network_country),
            None => false,
        }
    }
}

fn parse_ipv4(raw: &str) -> Option<u32> {
    if let Ok(v4) = raw.parse::<std::net::Ipv4Addr>() {
        return Some(u32::from(v4));
    }
    raw.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = "\
1.0.0.0,1.0.0.255,AU
16777472,16778239,CN
2.16.0.0,2.19.255.255,us
";

    #[test]
    fn resolves_dotted_and_integer_ranges() {
        let geo = GeoResolver::from_csv(DATASET);

        assert_eq!(
            geo.resolve_country("1.0.0.42".parse().unwrap()),
            Some("AU".to_string())
        );
        // 16777472 == 1.0.2.0
        assert_eq!(
            geo.resolve_country("1.0.2.10".parse().unwrap()),
            Some("CN".to_string())
        );
        // country codes normalize to uppercase at load
        assert_eq!(
            geo.resolve_country("2.17.0.1".parse().unwrap()),
            Some("US".to_string())
        );
    }

    #[test]
    fn miss_and_ipv6_return_none() {
        let geo = GeoResolver::from_csv(DATASET);

        assert_eq!(geo.resolve_country("9.9.9.9".parse().unwrap()), None);
        assert_eq!(geo.resolve_country("::1".parse().unwrap()), None);
        assert_eq!(GeoResolver::empty().resolve_country("1.0.0.1".parse().unwrap()), None);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let geo = GeoResolver::from_csv("not,a,row\n1.0.0.0,1.0.0.255,AU\n1.2.3.4,1.2.3.0,ZZ\n");
        assert_eq!(geo.ranges.len(), 1);
    }

    #[test]
    fn mismatch_requires_positive_disagreement() {
        assert!(GeoResolver::countries_mismatch(Some("DE"), "US"));
        assert!(!GeoResolver::countries_mismatch(Some("us"), "US"));
        assert!(!GeoResolver::countries_mismatch(None, "US"));
    }
}
