// SIRI-VM (vehicle monitoring) decoding.
//
// Only the handful of fields the map needs are pulled out of each
// <VehicleActivity>; everything else in the delivery is skipped.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Europe::London;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Result;

const ACTIVITY: &[u8] = b"VehicleActivity";
const LOCATION: &[u8] = b"VehicleLocation";

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleObservation {
    pub line_name: String,
    pub vehicle_ref: String,
    pub recorded_at: Option<DateTime<Utc>>,
    pub destination: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Default)]
struct RawActivity {
    line_name: Option<String>,
    vehicle_ref: Option<String>,
    recorded_at: Option<String>,
    destination: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
}

impl RawActivity {
    /// First occurrence wins, like a descendant query would return.
    fn slot(&mut self, name: &[u8], parent: Option<&[u8]>) -> Option<&mut Option<String>> {
        match name {
            b"PublishedLineName" => Some(&mut self.line_name),
            b"VehicleRef" => Some(&mut self.vehicle_ref),
            b"RecordedAtTime" => Some(&mut self.recorded_at),
            b"DestinationName" => Some(&mut self.destination),
            b"Latitude" if parent == Some(LOCATION) => Some(&mut self.latitude),
            b"Longitude" if parent == Some(LOCATION) => Some(&mut self.longitude),
            _ => None,
        }
    }

    fn into_observation(self) -> VehicleObservation {
        VehicleObservation {
            line_name: self.line_name.unwrap_or_default(),
            vehicle_ref: self.vehicle_ref.unwrap_or_default().replace('_', ""),
            recorded_at: self.recorded_at.as_deref().and_then(parse_timestamp),
            destination: self.destination.unwrap_or_default().replace('_', " "),
            latitude: self.latitude.as_deref().and_then(parse_coordinate),
            longitude: self.longitude.as_deref().and_then(parse_coordinate),
        }
    }
}

fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Feeds normally carry an offset; bare local times are taken as UK time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    London
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Decodes one feed document into the vehicle activities it contains.
pub fn parse_document(xml: &[u8]) -> Result<Vec<VehicleObservation>> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut current: Option<(usize, RawActivity)> = None;
    let mut observations = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if current.is_none() && name == ACTIVITY {
                    current = Some((path.len(), RawActivity::default()));
                }
                path.push(name);
                text.clear();
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => {
                let Some(name) = path.pop() else { continue };
                let depth = current.as_ref().map(|(depth, _)| *depth);
                if depth == Some(path.len()) {
                    if let Some((_, activity)) = current.take() {
                        observations.push(activity.into_observation());
                    }
                } else if let Some((_, activity)) = current.as_mut() {
                    if let Some(slot) = activity.slot(&name, path.last().map(Vec::as_slice)) {
                        if slot.is_none() {
                            *slot = Some(text.trim().to_string());
                        }
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(observations)
}

/// Decodes every document and concatenates the activities in feed order.
/// Any malformed document fails the whole batch.
pub fn parse_documents<I, B>(documents: I) -> Result<Vec<VehicleObservation>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut all = Vec::new();
    for doc in documents {
        all.extend(parse_document(doc.as_ref())?);
    }
    Ok(all)
}
