//! tagcast-core: frame types, the scan phase, window packetizing, and the
//! wire format. Runtime crates depend on this one.

pub mod config;
pub mod frame;
pub mod region;
pub mod scan;
pub mod window;
pub mod wire;

pub use frame::{BinaryFrame, FrameError, MARKER_VALUE};
pub use region::{DetectionCandidate, RegionValidator, Rejection, Verdict, WindowPolicy};
pub use scan::{ScanCursor, ScanReport, ScanState, Scanner};
pub use window::{extract_window, TransmitBuffer};
pub use wire::{decode_packet, PacketHeader, WireError, HEADER_LEN};
