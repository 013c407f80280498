//! Voice session bridge.
//!
//! One session per call: the transport handler pumps client frames into a
//! bounded channel, the bridge owns the realtime provider socket, reconciles
//! its event stream into transcript entries, dispatches tool calls into the
//! booking orchestrator, and finalizes the call into the same conversation
//! artifacts the text channels produce.

pub mod error;
pub mod protocol;
pub mod session;
pub mod transcript;

pub use error::VoiceSessionError;
pub use protocol::{ClientFrame, ServerFrame};
pub use session::VoiceSession;
pub use transcript::TranscriptReconciler;
