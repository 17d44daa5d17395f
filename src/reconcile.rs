// Merges each poll's observations into the marker set.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Europe::London;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::fleet::{Classifier, FleetClassification, InterestCategory, InterestSets};
use crate::markers::{MapSurface, MarkerHandle, MarkerView, PopupContent};
use crate::siri::VehicleObservation;

#[derive(Debug, Clone)]
pub struct MarkerRecord {
    pub handle: MarkerHandle,
    pub category: InterestCategory,
    pub last_fix: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopupState {
    pub last_opened: Option<String>,
    pub open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub observed: usize,
    pub skipped_invalid: usize,
    pub skipped_stale: usize,
    pub skipped_filtered: usize,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub popup_restored: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryCounts {
    pub none: usize,
    pub route_r: usize,
    pub route_k: usize,
    pub both: usize,
}

/// All state carried from one refresh cycle to the next.
pub struct ReconcileContext {
    classifier: Classifier,
    interest: InterestSets,
    stale_after: Duration,
    requirements_only: bool,
    markers: HashMap<String, MarkerRecord>,
    popup: PopupState,
    last_cycle: Option<(DateTime<Utc>, CycleReport)>,
}

impl ReconcileContext {
    pub fn new(classifier: Classifier, interest: InterestSets, stale_after: Duration) -> Self {
        Self {
            classifier,
            interest,
            stale_after,
            requirements_only: false,
            markers: HashMap::new(),
            popup: PopupState::default(),
            last_cycle: None,
        }
    }

    pub fn requirements_only(&self) -> bool {
        self.requirements_only
    }

    /// Takes effect on the next cycle.
    pub fn set_requirements_only(&mut self, enabled: bool) {
        self.requirements_only = enabled;
    }

    pub fn popup(&self) -> &PopupState {
        &self.popup
    }

    pub fn marker(&self, vehicle_ref: &str) -> Option<&MarkerRecord> {
        self.markers.get(vehicle_ref)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn last_cycle(&self) -> Option<&(DateTime<Utc>, CycleReport)> {
        self.last_cycle.as_ref()
    }

    pub fn category_counts(&self) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for record in self.markers.values() {
            match record.category {
                InterestCategory::None => counts.none += 1,
                InterestCategory::RouteR => counts.route_r += 1,
                InterestCategory::RouteK => counts.route_k += 1,
                InterestCategory::Both => counts.both += 1,
            }
        }
        counts
    }

    /// The map reported that a vehicle's popup was opened. Returns false when
    /// no marker exists for it.
    pub fn popup_opened(&mut self, vehicle_ref: &str, surface: &mut impl MapSurface) -> bool {
        let Some(record) = self.markers.get(vehicle_ref) else {
            return false;
        };
        surface.open_popup(record.handle);
        self.popup = PopupState {
            last_opened: Some(vehicle_ref.to_string()),
            open: true,
        };
        true
    }

    /// Ignored unless `vehicle_ref` is the popup currently tracked, so a late
    /// close for a previous vehicle cannot clobber a newer open.
    pub fn popup_closed(&mut self, vehicle_ref: &str, surface: &mut impl MapSurface) {
        if self.popup.last_opened.as_deref() == Some(vehicle_ref) {
            surface.close_popup();
            self.popup = PopupState::default();
        }
    }

    pub fn run_cycle(
        &mut self,
        observations: &[VehicleObservation],
        now: DateTime<Utc>,
        surface: &mut impl MapSurface,
    ) -> CycleReport {
        let mut report = CycleReport {
            observed: observations.len(),
            ..CycleReport::default()
        };

        if self.requirements_only {
            let dropped: Vec<String> = self
                .markers
                .iter()
                .filter(|(_, record)| !record.category.is_required())
                .map(|(vehicle_ref, _)| vehicle_ref.clone())
                .collect();
            for vehicle_ref in dropped {
                self.remove(&vehicle_ref, surface);
                report.removed += 1;
            }
        }

        let popup_was_open = surface.is_popup_open();

        for obs in observations {
            let Some((latitude, longitude)) = valid_position(obs) else {
                report.skipped_invalid += 1;
                continue;
            };
            let Some(recorded_at) = obs.recorded_at.filter(|ts| now - *ts <= self.stale_after) else {
                report.skipped_stale += 1;
                continue;
            };

            let class = self.classifier.classify(&obs.vehicle_ref);
            let category = self.interest.categorize(&class.fleet_number);
            if self.requirements_only && !category.is_required() {
                report.skipped_filtered += 1;
                continue;
            }

            let popup_html = popup_html(obs, &class, now, recorded_at);
            match self.markers.get_mut(&obs.vehicle_ref) {
                Some(record) => {
                    // Feeds can overlap; never move a marker back to an older fix.
                    if recorded_at >= record.last_fix {
                        surface.set_position(record.handle, latitude, longitude);
                        surface.set_popup(
                            record.handle,
                            PopupContent {
                                line: obs.line_name.clone(),
                                destination: obs.destination.clone(),
                                html: popup_html,
                                recorded_at,
                            },
                        );
                        record.last_fix = recorded_at;
                    }
                    report.updated += 1;
                }
                None => {
                    let handle = surface.add_marker(MarkerView {
                        vehicle_ref: obs.vehicle_ref.clone(),
                        fleet_number: class.fleet_number,
                        vehicle_type: class.vehicle_type,
                        line: obs.line_name.clone(),
                        destination: obs.destination.clone(),
                        latitude,
                        longitude,
                        icon_class: category.icon_class(),
                        popup_html,
                        recorded_at,
                        popup_open: false,
                    });
                    self.markers.insert(
                        obs.vehicle_ref.clone(),
                        MarkerRecord {
                            handle,
                            category,
                            last_fix: recorded_at,
                        },
                    );
                    report.created += 1;
                }
            }
        }

        let expired: Vec<String> = self
            .markers
            .iter()
            .filter(|(_, record)| now - record.last_fix > self.stale_after)
            .map(|(vehicle_ref, _)| vehicle_ref.clone())
            .collect();
        for vehicle_ref in expired {
            self.remove(&vehicle_ref, surface);
            report.removed += 1;
        }

        if popup_was_open && self.popup.open {
            if let Some(record) = self.popup.last_opened.as_deref().and_then(|r| self.markers.get(r)) {
                surface.open_popup(record.handle);
                report.popup_restored = true;
            }
        }

        debug!(?report, "Reconciled {} markers", self.markers.len());
        self.last_cycle = Some((now, report.clone()));
        report
    }

    fn remove(&mut self, vehicle_ref: &str, surface: &mut impl MapSurface) {
        if let Some(record) = self.markers.remove(vehicle_ref) {
            surface.remove_marker(record.handle);
            if self.popup.last_opened.as_deref() == Some(vehicle_ref) {
                self.popup = PopupState::default();
            }
        }
    }
}

fn valid_position(obs: &VehicleObservation) -> Option<(f64, f64)> {
    let lat = obs.latitude?;
    let lon = obs.longitude?;
    // A zero coordinate is how feeds report "no fix".
    if lat == 0.0 || lon == 0.0 || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some((lat, lon))
}

pub fn time_ago(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{seconds} seconds ago")
    } else if seconds < 120 {
        "1 minute ago".to_string()
    } else {
        format!("{} minutes ago", seconds / 60)
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn service_label(line: &str, destination: &str) -> String {
    match (line.is_empty(), destination.is_empty()) {
        (false, false) => format!("<b>{}</b> to <b>{}</b>", escape_html(line), escape_html(destination)),
        (false, true) => format!("<b>{}</b>", escape_html(line)),
        _ => "Not in Service".to_string(),
    }
}

fn popup_html(
    obs: &VehicleObservation,
    class: &FleetClassification,
    now: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
) -> String {
    let local = recorded_at.with_timezone(&London).format("%H:%M:%S");
    format!(
        "{}<br><b>{}</b> – {}<br><small>{} ({})</small>",
        service_label(&obs.line_name, &obs.destination),
        escape_html(&class.fleet_number),
        escape_html(&class.vehicle_type),
        time_ago((now - recorded_at).num_seconds()),
        local,
    )
}
