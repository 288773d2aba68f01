// Controller device topology: the filtered document and reader extraction.
//
// The topology document nests devices as
// `data[].floors[].doors[].device_groups[][]` and can run to several
// megabytes. Only the handful of fields below are kept while parsing.

use std::io;
use std::sync::LazyLock;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncBufRead;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunked::ChunkedTransferDecoder;
use crate::error::Error;
use crate::extract::{FieldFilter, FilterError};

/// Device type substrings that identify a reader.
const READER_MARKERS: [&str; 3] = ["UA-G2", "UA-G3", "Reader"];

/// Paths kept from the topology document.
pub const TOPOLOGY_FIELDS: [&str; 6] = [
    "data[*].floors[*].name",
    "data[*].floors[*].doors[*].name",
    "data[*].floors[*].doors[*].device_groups[*][*].device_type",
    "data[*].floors[*].doors[*].device_groups[*][*].unique_id",
    "data[*].floors[*].doors[*].device_groups[*][*].name",
    "data[*].floors[*].doors[*].device_groups[*][*].mac",
];

static TOPOLOGY_FILTER: LazyLock<Result<FieldFilter, FilterError>> =
    LazyLock::new(|| FieldFilter::from_patterns(TOPOLOGY_FIELDS));

/// A reader device discovered in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reader {
    pub id: String,
    pub name: String,
    pub mac: String,
    pub device_type: String,
    /// `"<floor> / <door>"`, or whichever of the two is non-empty.
    pub location: String,
}

/// Readers in document order, plus a count of every identified device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub readers: Vec<Reader>,
    pub total_devices: usize,
}

/// Whether a controller device type string names a reader.
pub fn is_reader_type(device_type: &str) -> bool {
    READER_MARKERS.iter().any(|m| device_type.contains(m))
}

/// Join floor and door names into a display location.
pub fn location(floor: &str, door: &str) -> String {
    match (floor.is_empty(), door.is_empty()) {
        (false, false) => format!("{floor} / {door}"),
        (false, true) => floor.to_owned(),
        (true, _) => door.to_owned(),
    }
}

/// Parse a topology document from a blocking reader.
pub fn parse_topology<R: io::Read>(reader: R) -> Result<Topology, Error> {
    let filter = TOPOLOGY_FILTER
        .as_ref()
        .map_err(|e| Error::Parse(e.to_string()))?;
    let filtered = filter.extract_reader(io::BufReader::new(reader)).map_err(map_json_error)?;
    Ok(collect_readers(&filtered))
}

/// Parse a topology document from an in-memory body.
pub fn parse_topology_slice(body: &[u8]) -> Result<Topology, Error> {
    let filter = TOPOLOGY_FILTER
        .as_ref()
        .map_err(|e| Error::Parse(e.to_string()))?;
    let filtered = filter.extract_slice(body).map_err(map_json_error)?;
    Ok(collect_readers(&filtered))
}

/// Decode a response body and parse it as a topology document.
///
/// The JSON parser is synchronous, so it runs on the blocking pool and
/// pulls decoded bytes from the async decoder through a bridge. Dropping
/// the returned future (an outer timeout firing) cancels the body read,
/// which closes the source and lets the blocking parse unwind.
pub async fn read_topology<R>(decoder: ChunkedTransferDecoder<R>) -> Result<Topology, Error>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let cancel = CancellationToken::new();
    let stream = decoder.into_stream_until(cancel.clone()).boxed();
    let bridge = SyncIoBridge::new(StreamReader::new(stream));
    let _cancel_on_drop = cancel.drop_guard();

    tokio::task::spawn_blocking(move || parse_topology(bridge))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

fn map_json_error(err: serde_json::Error) -> Error {
    use serde_json::error::Category;

    match err.classify() {
        Category::Io => {
            let io_err = io::Error::from(err);
            match io_err.kind() {
                io::ErrorKind::UnexpectedEof => Error::IncompleteTopology,
                io::ErrorKind::InvalidData => Error::ChunkFraming,
                _ => Error::Io(io_err),
            }
        }
        Category::Eof => Error::IncompleteTopology,
        Category::Syntax | Category::Data => Error::Parse(err.to_string()),
    }
}

fn collect_readers(doc: &Value) -> Topology {
    let mut topology = Topology::default();

    for site in items(doc.get("data")) {
        for floor in items(site.get("floors")) {
            let floor_name = text(floor.get("name"));
            for door in items(floor.get("doors")) {
                let door_name = text(door.get("name"));
                for group in items(door.get("device_groups")) {
                    for device in items(Some(group)) {
                        visit_device(&mut topology, device, floor_name, door_name);
                    }
                }
            }
        }
    }

    debug!(
        readers = topology.readers.len(),
        total_devices = topology.total_devices,
        "topology parsed"
    );
    topology
}

fn visit_device(topology: &mut Topology, device: &Value, floor: &str, door: &str) {
    let id = text(device.get("unique_id"));
    if id.is_empty() {
        return;
    }
    topology.total_devices += 1;

    let device_type = text(device.get("device_type"));
    if !is_reader_type(device_type) {
        return;
    }

    topology.readers.push(Reader {
        id: id.to_owned(),
        name: text(device.get("name")).to_owned(),
        mac: text(device.get("mac")).to_owned(),
        device_type: device_type.to_owned(),
        location: location(floor, door),
    });
}

fn items(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

fn text(value: Option<&Value>) -> &str {
    value.and_then(Value::as_str).unwrap_or_default()
}
