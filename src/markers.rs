// Marker layer mirrored by the browser map.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MarkerHandle(u64);

/// Everything the page needs to draw one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerView {
    pub vehicle_ref: String,
    pub fleet_number: String,
    pub vehicle_type: String,
    pub line: String,
    pub destination: String,
    pub latitude: f64,
    pub longitude: f64,
    pub icon_class: &'static str,
    pub popup_html: String,
    pub recorded_at: DateTime<Utc>,
    pub popup_open: bool,
}

/// Text shown for a marker; replaced whenever a newer fix arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct PopupContent {
    pub line: String,
    pub destination: String,
    pub html: String,
    pub recorded_at: DateTime<Utc>,
}

/// What the reconciler needs from a map library.
pub trait MapSurface {
    fn add_marker(&mut self, view: MarkerView) -> MarkerHandle;
    fn set_position(&mut self, handle: MarkerHandle, latitude: f64, longitude: f64);
    /// Rebinding popup content closes that marker's popup if it was open.
    fn set_popup(&mut self, handle: MarkerHandle, content: PopupContent);
    fn remove_marker(&mut self, handle: MarkerHandle);
    fn open_popup(&mut self, handle: MarkerHandle);
    fn close_popup(&mut self);
    fn is_popup_open(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct MarkerLayer {
    markers: BTreeMap<MarkerHandle, MarkerView>,
    open_popup: Option<MarkerHandle>,
    next_handle: u64,
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, handle: MarkerHandle) -> Option<MarkerView> {
        self.markers.get(&handle).map(|view| self.with_popup_flag(handle, view))
    }

    /// Snapshot ordered by vehicle ref.
    pub fn views(&self) -> Vec<MarkerView> {
        let mut views: Vec<_> = self
            .markers
            .iter()
            .map(|(handle, view)| self.with_popup_flag(*handle, view))
            .collect();
        views.sort_by(|a, b| a.vehicle_ref.cmp(&b.vehicle_ref));
        views
    }

    fn with_popup_flag(&self, handle: MarkerHandle, view: &MarkerView) -> MarkerView {
        MarkerView {
            popup_open: self.open_popup == Some(handle),
            ..view.clone()
        }
    }
}

impl MapSurface for MarkerLayer {
    fn add_marker(&mut self, view: MarkerView) -> MarkerHandle {
        let handle = MarkerHandle(self.next_handle);
        self.next_handle += 1;
        self.markers.insert(handle, view);
        handle
    }

    fn set_position(&mut self, handle: MarkerHandle, latitude: f64, longitude: f64) {
        if let Some(view) = self.markers.get_mut(&handle) {
            view.latitude = latitude;
            view.longitude = longitude;
        }
    }

    fn set_popup(&mut self, handle: MarkerHandle, content: PopupContent) {
        if let Some(view) = self.markers.get_mut(&handle) {
            view.line = content.line;
            view.destination = content.destination;
            view.popup_html = content.html;
            view.recorded_at = content.recorded_at;
            if self.open_popup == Some(handle) {
                self.open_popup = None;
            }
        }
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        self.markers.remove(&handle);
        if self.open_popup == Some(handle) {
            self.open_popup = None;
        }
    }

    fn open_popup(&mut self, handle: MarkerHandle) {
        if self.markers.contains_key(&handle) {
            self.open_popup = Some(handle);
        }
    }

    fn close_popup(&mut self) {
        self.open_popup = None;
    }

    fn is_popup_open(&self) -> bool {
        self.open_popup.is_some()
    }
}
