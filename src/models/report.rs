use serde::{Deserialize, Serialize};

/// Report payload produced by the external scanner.
///
/// The scanner emits ZAP-style JSON: a generator header, the scanned site,
/// a flat alert list and a per-severity rollup. The payload is stored
/// verbatim in the result sink; only the summary is lifted into the job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(rename = "@version", default)]
    pub version: String,
    #[serde(rename = "@generated", default)]
    pub generated: String,
    pub site: String,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    pub summary: RiskSummary,
}

/// A single finding reported by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub pluginid: String,
    pub name: String,
    pub risk: String,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub instances: Vec<AlertInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cweid: Option<String>,
}

/// One occurrence of an alert at a concrete location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertInstance {
    pub uri: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Alert counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RiskSummary {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub informational: u32,
}

impl RiskSummary {
    /// Recount severities from the alert list. Used when the scanner omits
    /// or miscounts the rollup.
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut summary = RiskSummary::default();
        for alert in alerts {
            match alert.risk.to_ascii_lowercase().as_str() {
                "high" => summary.high += 1,
                "medium" => summary.medium += 1,
                "low" => summary.low += 1,
                _ => summary.informational += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scanner_report_json() {
        let raw = serde_json::json!({
            "@version": "2.11.1",
            "@generated": "2026-08-06T10:00:00Z",
            "site": "https://example.com",
            "alerts": [
                {
                    "pluginid": "10021",
                    "name": "X-Content-Type-Options Header Missing",
                    "risk": "Medium",
                    "confidence": "2",
                    "desc": "Anti-MIME-Sniffing header not set",
                    "solution": "Set X-Content-Type-Options: nosniff",
                    "instances": [
                        { "uri": "https://example.com", "method": "GET" }
                    ]
                }
            ],
            "summary": { "High": 0, "Medium": 1, "Low": 0, "Informational": 0 }
        });

        let report: ScanReport = serde_json::from_value(raw).unwrap();
        assert_eq!(report.site, "https://example.com");
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.summary.medium, 1);
        assert_eq!(report.alerts[0].instances[0].method, "GET");
    }

    #[test]
    fn recounts_summary_from_alerts() {
        let alerts = vec![
            Alert {
                pluginid: "1".into(),
                name: "a".into(),
                risk: "High".into(),
                confidence: String::new(),
                desc: String::new(),
                solution: String::new(),
                instances: vec![],
                reference: None,
                cweid: None,
            },
            Alert {
                pluginid: "2".into(),
                name: "b".into(),
                risk: "informational".into(),
                confidence: String::new(),
                desc: String::new(),
                solution: String::new(),
                instances: vec![],
                reference: None,
                cweid: None,
            },
        ];

        let summary = RiskSummary::from_alerts(&alerts);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.informational, 1);
        assert_eq!(summary.medium, 0);
    }
}
