pub mod adapter;
pub mod bus;
pub mod mplayer;
pub mod recorder;
pub mod remote;
pub mod session;
pub mod state;

pub use adapter::*;
pub use mplayer::MPlayerEngine;
pub use recorder::{RecordRequest, Recorder, RecorderKind};
pub use remote::RemoteEngine;
pub use session::*;
pub use state::*;
