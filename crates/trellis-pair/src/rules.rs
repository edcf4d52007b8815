//! Admission rules
//!
//! In memory the policy is a plain sum type. The numeric sentinel form
//! (`END` terminator, `NO_RULES` allow-all marker, `NONE` block-all marker)
//! exists only for serialization, mirroring the bounded tag list carried in
//! configuration.

use serde::{Deserialize, Serialize};

use trellis_common::device_type::{TAG_END_OF_RULES, TAG_NO_RULES};
use trellis_common::{DeviceType, PAIR_RULES_MAX, TrellisError};

/// Which device types may pair with this node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairRules {
    /// Accept every peer in the group.
    AllowAll,
    /// Reject everything.
    DenyAll,
    /// Accept only the listed types.
    Only(Vec<DeviceType>),
}

impl PairRules {
    pub fn allows(&self, device_type: DeviceType) -> bool {
        match self {
            PairRules::AllowAll => true,
            PairRules::DenyAll => false,
            PairRules::Only(types) => types.contains(&device_type),
        }
    }

    /// Serialize to the bounded tag list, `END`-terminated.
    pub fn to_tags(&self) -> Result<Vec<u8>, TrellisError> {
        let mut tags = match self {
            PairRules::AllowAll => vec![TAG_NO_RULES],
            PairRules::DenyAll => vec![DeviceType::None.tag()],
            PairRules::Only(types) => {
                if types.is_empty() {
                    return Err(TrellisError::invalid_argument("empty allow list"));
                }
                types.iter().map(|ty| ty.tag()).collect()
            }
        };
        tags.push(TAG_END_OF_RULES);

        if tags.len() > PAIR_RULES_MAX {
            return Err(TrellisError::invalid_argument(format!(
                "rule list holds {} tags, limit {PAIR_RULES_MAX}",
                tags.len()
            )));
        }
        Ok(tags)
    }

    /// Parse a serialized tag list. Tags after the terminator are ignored;
    /// a missing terminator within the size budget is rejected.
    pub fn from_tags(tags: &[u8]) -> Result<Self, TrellisError> {
        if tags.is_empty() || tags.len() > PAIR_RULES_MAX {
            return Err(TrellisError::invalid_argument("rule list size"));
        }

        let mut types = Vec::new();
        for &tag in tags {
            if tag == TAG_END_OF_RULES {
                if types.is_empty() {
                    return Ok(PairRules::DenyAll);
                }
                return Ok(PairRules::Only(types));
            }
            if tag == TAG_NO_RULES {
                return Ok(PairRules::AllowAll);
            }
            match DeviceType::from_tag(tag) {
                Some(DeviceType::None) => return Ok(PairRules::DenyAll),
                Some(ty) => types.push(ty),
                None => {
                    return Err(TrellisError::invalid_argument(format!(
                        "unknown rule tag {tag}"
                    )));
                }
            }
        }
        Err(TrellisError::invalid_argument("rule list not terminated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let rules = PairRules::AllowAll;
        assert!(rules.allows(DeviceType::Switch));
        assert!(rules.allows(DeviceType::Alarm));
    }

    #[test]
    fn test_deny_all() {
        let rules = PairRules::DenyAll;
        assert!(!rules.allows(DeviceType::Switch));
    }

    #[test]
    fn test_membership() {
        let rules = PairRules::Only(vec![DeviceType::LightingOnOff, DeviceType::Switch]);
        assert!(rules.allows(DeviceType::Switch));
        assert!(!rules.allows(DeviceType::Alarm));
    }

    #[test]
    fn test_sentinel_round_trip() {
        assert_eq!(
            PairRules::AllowAll.to_tags().unwrap(),
            vec![TAG_NO_RULES, TAG_END_OF_RULES]
        );
        assert_eq!(
            PairRules::DenyAll.to_tags().unwrap(),
            vec![0, TAG_END_OF_RULES]
        );

        for rules in [
            PairRules::AllowAll,
            PairRules::DenyAll,
            PairRules::Only(vec![DeviceType::Sensor, DeviceType::DoorSensor]),
        ] {
            let tags = rules.to_tags().unwrap();
            assert_eq!(PairRules::from_tags(&tags).unwrap(), rules);
        }
    }

    #[test]
    fn test_from_tags_edge_cases() {
        // bare terminator blocks everything
        assert_eq!(
            PairRules::from_tags(&[TAG_END_OF_RULES]).unwrap(),
            PairRules::DenyAll
        );
        // allow-all marker wins immediately
        assert_eq!(
            PairRules::from_tags(&[TAG_NO_RULES, 2, TAG_END_OF_RULES]).unwrap(),
            PairRules::AllowAll
        );
        assert!(PairRules::from_tags(&[]).is_err());
        assert!(PairRules::from_tags(&[2, 3, 4]).is_err());
        assert!(PairRules::from_tags(&[250, TAG_END_OF_RULES]).is_err());

        let too_long = vec![2u8; PAIR_RULES_MAX + 1];
        assert!(PairRules::from_tags(&too_long).is_err());
    }

    #[test]
    fn test_to_tags_limit() {
        let nine: Vec<DeviceType> = (1..=9).map(|t| DeviceType::from_tag(t).unwrap()).collect();
        assert!(PairRules::Only(nine).to_tags().is_ok());

        let ten: Vec<DeviceType> = (1..=10).map(|t| DeviceType::from_tag(t).unwrap()).collect();
        assert!(PairRules::Only(ten).to_tags().is_err());
    }
}
