//! Decision fusion and the small vocabularies around it.

use crate::matcher::Identity;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Decision {
    #[serde(rename = "ACCESO")]
    Acceso,
    #[serde(rename = "ALERTA")]
    Alerta,
    /// Known face that has not blinked yet.
    #[serde(rename = "LIVENESS")]
    Liveness,
}

impl Decision {
    /// Priority order: unknown, then liveness, then access.
    pub fn fuse(identity: &Identity, live: bool) -> Self {
        match identity {
            Identity::Unknown => Decision::Alerta,
            Identity::Known(_) if !live => Decision::Liveness,
            Identity::Known(_) => Decision::Acceso,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Acceso => "ACCESO",
            Decision::Alerta => "ALERTA",
            Decision::Liveness => "LIVENESS",
        }
    }

    pub fn takes_snapshot(self) -> bool {
        matches!(self, Decision::Acceso | Decision::Alerta)
    }

    /// `LIVENESS` ticks are drawn but not written to the event log.
    pub fn is_logged(self) -> bool {
        matches!(self, Decision::Acceso | Decision::Alerta)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match quality bucket relative to the acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Mid,
    Low,
}

impl Quality {
    pub fn from_distance(distance: f32, threshold: f32) -> Self {
        if distance <= 0.6 * threshold {
            Quality::High
        } else if distance <= 0.85 * threshold {
            Quality::Mid
        } else {
            Quality::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Mid => "mid",
            Quality::Low => "low",
        }
    }
}

/// Keep only alphanumeric characters; `anon` if nothing survives.
pub fn sanitize_label(label: &str) -> String {
    let clean: String = label.chars().filter(|c| c.is_alphanumeric()).collect();
    if clean.is_empty() {
        "anon".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fusion_priority() {
        let known = Identity::Known("A".into());
        assert_eq!(Decision::fuse(&Identity::Unknown, true), Decision::Alerta);
        assert_eq!(Decision::fuse(&Identity::Unknown, false), Decision::Alerta);
        assert_eq!(Decision::fuse(&known, false), Decision::Liveness);
        assert_eq!(Decision::fuse(&known, true), Decision::Acceso);
    }

    #[test]
    fn test_liveness_is_neither_logged_nor_snapshotted() {
        assert!(!Decision::Liveness.is_logged());
        assert!(!Decision::Liveness.takes_snapshot());
        assert!(Decision::Alerta.is_logged() && Decision::Acceso.takes_snapshot());
    }

    #[test]
    fn test_quality_buckets() {
        assert_eq!(Quality::from_distance(0.25, 0.5), Quality::High);
        assert_eq!(Quality::from_distance(0.40, 0.5), Quality::Mid);
        assert_eq!(Quality::from_distance(0.49, 0.5), Quality::Low);
        assert_eq!(Quality::from_distance(0.9, 0.5).as_str(), "low");
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("12_ana maria"), "12anamaria");
        assert_eq!(sanitize_label("José-Ñ"), "JoséÑ");
        assert_eq!(sanitize_label("../_"), "anon");
    }
}
