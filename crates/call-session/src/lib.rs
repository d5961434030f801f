//! # CallRelay call sessions
//!
//! Drives one call from its directory record to a terminal outcome:
//!
//! - [`SessionNegotiator`] maps the local role and inbound negotiation
//!   messages onto a [`TransportSession`], queueing early candidates.
//! - [`CallSessionController`] owns the lifecycle state machine, the
//!   signaling channel, local media and reconnection.
//! - [`CallHandle`] runs a controller on its own task and serializes user
//!   commands with everything else the call reacts to.
//! - [`InviteCenter`] handles the invitation handshake that precedes a call.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use callrelay_session::{
//!     CallConfig, CallDependencies, CallHandle, CallSessionController, LocalUser,
//!     SyntheticMediaProvider, TransportFactory,
//! };
//!
//! # async fn run(transport: Arc<dyn TransportFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = CallConfig::load(Some("callrelay"))?;
//! let deps = CallDependencies::from_config(&config, "token", Arc::new(SyntheticMediaProvider), transport)?;
//! let controller = CallSessionController::new(config, deps, LocalUser::new("alice", "Alice"));
//!
//! let call = CallHandle::spawn(controller, "42".into());
//! let outcome = call.outcome().await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod handle;
pub mod invite;
pub mod media;
pub mod negotiator;
pub mod reconnect;
pub mod state;
pub mod transport;
pub mod types;

pub use config::{CallConfig, IceServerConfig, ReconnectConfig};
pub use controller::{CallDependencies, CallSessionController, ControllerInput};
pub use error::{MediaError, SessionError, SessionResult, TransportError};
pub use events::{CallEvent, CallOutcome};
pub use handle::CallHandle;
pub use invite::{InviteCenter, InviteEvent};
pub use media::{AudioConstraints, LocalAudioTrack, LocalMediaStream, MediaProvider, SyntheticMediaProvider};
pub use negotiator::{RemoteOutcome, SessionNegotiator, SignalRoute};
pub use reconnect::{ReconnectPolicy, ScheduledAttempt};
pub use state::{CallStateMachine, CallTrigger, LifecycleState};
pub use transport::{SdpKind, SessionDescription, TransportEvent, TransportFactory, TransportSession, TransportState};
pub use types::{CallSession, LocalUser, Partner, Role};
