// Fleet number and vehicle type lookup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const UNKNOWN_TYPE: &str = "Unknown";

/// Inclusive fleet number ranges and the type of vehicle delivered in them.
const FLEET_RANGES: &[(u32, u32, &str)] = &[
    (10001, 10198, "ADL E400"),
    (10301, 11880, "ADL E400MMC"),
    (11881, 11930, "ADL E400City"),
    (12001, 12364, "ADL E400H"),
    (13161, 13193, "Volvo B5LH G2"),
    (17001, 18539, "Volvo B5LH G2"),
    (18901, 18930, "StreetDeck HEV"),
    (19001, 19916, "ADL E400"),
    (21351, 21440, "B8RLE Evora"),
    (26001, 26359, "ADL E200MMC"),
    (27101, 27959, "ADL E300"),
    (36011, 37327, "ADL E200"),
    (37328, 37633, "ADL E200MMC"),
    (44901, 44904, "Mellor Strata"),
    (46021, 46024, "ADL E100EV"),
    (48104, 48114, "Optare Solo SR"),
    (66071, 66082, "BZL Midi"),
    (76101, 76104, "BZL SD"),
    (80087, 80121, "ADL E400EV"),
    (84201, 84250, "BYD E400EV"),
    (86031, 86069, "BZL DD"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub fleet_number: String,
    pub vehicle_type: String,
}

pub type FleetClassification = FleetEntry;

/// Drops a leading depot code, e.g. `"MN 12345"` -> `"12345"`.
pub fn strip_depot_code(fleet_number: &str) -> &str {
    fleet_number.split_whitespace().last().unwrap_or("")
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

pub fn vehicle_type_for(fleet_number: &str) -> &'static str {
    let Some(num) = leading_number(fleet_number.trim_start()) else {
        return UNKNOWN_TYPE;
    };
    FLEET_RANGES
        .iter()
        .find(|(lo, hi, _)| (*lo..=*hi).contains(&num))
        .map(|(_, _, kind)| *kind)
        .unwrap_or(UNKNOWN_TYPE)
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    exceptions: HashMap<String, FleetEntry>,
}

impl Classifier {
    pub fn new(exceptions: HashMap<String, FleetEntry>) -> Self {
        Self { exceptions }
    }

    pub fn classify(&self, vehicle_ref: &str) -> FleetClassification {
        if let Some(entry) = self.exceptions.get(vehicle_ref) {
            return entry.clone();
        }
        let fleet_number = strip_depot_code(vehicle_ref);
        FleetEntry {
            fleet_number: fleet_number.to_string(),
            vehicle_type: vehicle_type_for(fleet_number).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestCategory {
    None,
    RouteR,
    RouteK,
    Both,
}

impl InterestCategory {
    pub fn icon_class(self) -> &'static str {
        match self {
            InterestCategory::None => "newicon",
            InterestCategory::RouteR => "r-reqicon",
            InterestCategory::RouteK => "k-reqicon",
            InterestCategory::Both => "bothreqicon",
        }
    }

    pub fn is_required(self) -> bool {
        self != InterestCategory::None
    }
}

/// The curated fleet numbers shown in requirements-only mode.
#[derive(Debug, Clone, Default)]
pub struct InterestSets {
    pub r_requirements: HashSet<String>,
    pub k_requirements: HashSet<String>,
    pub both: HashSet<String>,
}

impl InterestSets {
    /// A fleet number listed in several sets resolves in R, K, both order.
    pub fn categorize(&self, fleet_number: &str) -> InterestCategory {
        if self.r_requirements.contains(fleet_number) {
            InterestCategory::RouteR
        } else if self.k_requirements.contains(fleet_number) {
            InterestCategory::RouteK
        } else if self.both.contains(fleet_number) {
            InterestCategory::Both
        } else {
            InterestCategory::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        let mut exceptions = HashMap::new();
        exceptions.insert(
            "10050".to_string(),
            FleetEntry {
                fleet_number: "VW1050".into(),
                vehicle_type: "Volvo B5LH Gemini 3".into(),
            },
        );
        exceptions.insert(
            "9001".to_string(),
            FleetEntry {
                fleet_number: "TE1001".into(),
                vehicle_type: "ADL E400".into(),
            },
        );
        Classifier::new(exceptions)
    }

    #[test]
    fn range_table() {
        let c = Classifier::default();
        assert_eq!(c.classify("10050").vehicle_type, "ADL E400");
        assert_eq!(c.classify("10050").fleet_number, "10050");
        assert_eq!(c.classify("40000").vehicle_type, UNKNOWN_TYPE);
        assert_eq!(c.classify("10001").vehicle_type, "ADL E400");
        assert_eq!(c.classify("10198").vehicle_type, "ADL E400");
        assert_eq!(c.classify("10199").vehicle_type, UNKNOWN_TYPE);
        assert_eq!(c.classify("11881").vehicle_type, "ADL E400City");
        assert_eq!(c.classify("86069").vehicle_type, "BZL DD");
    }

    #[test]
    fn non_numeric_refs_are_unknown() {
        let c = Classifier::default();
        assert_eq!(c.classify("").vehicle_type, UNKNOWN_TYPE);
        assert_eq!(c.classify("SN12ABC").vehicle_type, UNKNOWN_TYPE);
    }

    #[test]
    fn leading_digits_are_used() {
        assert_eq!(vehicle_type_for("27101A"), "ADL E300");
    }

    #[test]
    fn depot_code_is_dropped() {
        let c = Classifier::default();
        let class = c.classify("MN 36011");
        assert_eq!(class.fleet_number, "36011");
        assert_eq!(class.vehicle_type, "ADL E200");
    }

    #[test]
    fn exception_table_wins() {
        let c = classifier();
        let class = c.classify("10050");
        assert_eq!(class.fleet_number, "VW1050");
        assert_eq!(class.vehicle_type, "Volvo B5LH Gemini 3");
        assert_eq!(c.classify("9001").fleet_number, "TE1001");
    }

    #[test]
    fn classification_is_stable_outside_exceptions() {
        let with = classifier();
        let without = Classifier::default();
        for id in ["12001", "17500", "40000", "84250", "99999"] {
            assert_eq!(with.classify(id), without.classify(id));
            assert_eq!(with.classify(id), with.classify(id));
        }
    }

    #[test]
    fn categories() {
        let sets = InterestSets {
            r_requirements: ["1".to_string()].into(),
            k_requirements: ["2".to_string(), "1".to_string()].into(),
            both: ["3".to_string()].into(),
        };
        assert_eq!(sets.categorize("1"), InterestCategory::RouteR);
        assert_eq!(sets.categorize("2"), InterestCategory::RouteK);
        assert_eq!(sets.categorize("3"), InterestCategory::Both);
        assert_eq!(sets.categorize("4"), InterestCategory::None);
        assert_eq!(InterestCategory::Both.icon_class(), "bothreqicon");
        assert!(!InterestCategory::None.is_required());
    }
}
