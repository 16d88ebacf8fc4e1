//! Hello and authentication state machines.
//!
//! Both sides are pure state machines: they consume an [`Envelope`] and
//! return a [`Step`] holding the envelopes to send and what the exchange
//! concluded. I/O, timeouts and roster updates belong to the caller, so the
//! same code drives TCP sessions, in-process sessions and the unit tests.
//!
//! Each side allocates tags for its own requests from its own
//! [`TagGenerator`] and echoes the request tag in its replies. A reply whose
//! tag does not match the pending request is ignored.

use crate::error::{constants, SessionFailure};
use crate::node::player::validate_player_name;
use crate::protocol::auth::{self, Password};
use crate::protocol::message::{
    BeginAuthenticationRequest, BeginAuthenticationResponse, EndAuthentication, Envelope,
    HelloRequest, HelloResponse, Message, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
use crate::protocol::tag::{Tag, TagGenerator};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

/// What an exchange step concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// More messages are expected.
    Continue,
    /// The message did not fit the current state and was dropped.
    Ignored,
    /// Host only: the response checked out. The caller must admit the
    /// player and answer with [`HostHandshake::complete`].
    Verified { player_name: String },
    /// Client only: the host accepted us.
    Established { protocol_version: u32 },
    /// The exchange is over; tear the connection down after sending.
    Failed(SessionFailure),
}

#[derive(Debug)]
pub struct Step {
    pub outgoing: Vec<Envelope>,
    pub outcome: Outcome,
}

impl Step {
    fn send(envelope: Envelope, outcome: Outcome) -> Self {
        Self {
            outgoing: vec![envelope],
            outcome,
        }
    }

    fn quiet(outcome: Outcome) -> Self {
        Self {
            outgoing: Vec::new(),
            outcome,
        }
    }

    fn ignored() -> Self {
        Self::quiet(Outcome::Ignored)
    }
}

/// Version a host settles on, or the failure to report.
pub fn choose_version(local: u32, requested: u32) -> Result<u32, SessionFailure> {
    let chosen = local.min(requested);
    if chosen < MIN_PROTOCOL_VERSION {
        return Err(SessionFailure::UnsupportedVersion {
            requested,
            minimum: MIN_PROTOCOL_VERSION,
            maximum: local,
        });
    }
    Ok(chosen)
}

enum HostPhase {
    AwaitingHello,
    AwaitingResponse {
        tag: Tag,
        challenge: Zeroizing<Vec<u8>>,
        salt: Vec<u8>,
    },
    Verifying {
        tag: Tag,
        player_name: String,
    },
    Authenticated {
        player_name: String,
    },
    Failed,
}

/// Host end of one connection.
pub struct HostHandshake {
    phase: HostPhase,
    tags: TagGenerator,
    protocol_version: u32,
    chosen_version: Option<u32>,
}

impl HostHandshake {
    pub fn new(protocol_version: u32) -> Self {
        Self {
            phase: HostPhase::AwaitingHello,
            tags: TagGenerator::new(),
            protocol_version: protocol_version.min(PROTOCOL_VERSION),
            chosen_version: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, HostPhase::Authenticated { .. })
    }

    pub fn player_name(&self) -> Option<&str> {
        match &self.phase {
            HostPhase::Authenticated { player_name } => Some(player_name),
            _ => None,
        }
    }

    pub fn chosen_version(&self) -> Option<u32> {
        self.chosen_version
    }

    pub fn handle(&mut self, envelope: Envelope, password: &Password) -> Step {
        let Envelope { tag, message } = envelope;
        let awaiting_hello = matches!(self.phase, HostPhase::AwaitingHello);
        let awaiting_response = matches!(self.phase, HostPhase::AwaitingResponse { .. });
        match message {
            Message::HelloRequest(hello) if awaiting_hello => self.on_hello(tag, hello),
            Message::BeginAuthenticationResponse(response) if awaiting_response => {
                self.on_response(tag, response, password)
            }
            other => {
                warn!(message = other.kind(), tag, "Unexpected message during handshake");
                Step::ignored()
            }
        }
    }

    fn on_hello(&mut self, tag: Tag, hello: HelloRequest) -> Step {
        match choose_version(self.protocol_version, hello.supported_protocol_version) {
            Ok(version) => {
                self.chosen_version = Some(version);
                let (challenge, salt) = auth::generate_challenge();
                let request_tag = self.tags.next_tag();
                let request = BeginAuthenticationRequest {
                    challenge: challenge.clone(),
                    salt: salt.clone(),
                };
                self.phase = HostPhase::AwaitingResponse {
                    tag: request_tag,
                    challenge: Zeroizing::new(challenge),
                    salt,
                };
                debug!(version, tag = request_tag, "Hello accepted, challenge issued");
                Step {
                    outgoing: vec![
                        Envelope::new(
                            tag,
                            Message::HelloResponse(HelloResponse {
                                outcome: Ok(version),
                            }),
                        ),
                        Envelope::new(request_tag, Message::BeginAuthenticationRequest(request)),
                    ],
                    outcome: Outcome::Continue,
                }
            }
            Err(failure) => {
                warn!(
                    requested = hello.supported_protocol_version,
                    "No common protocol version"
                );
                self.phase = HostPhase::Failed;
                Step::send(
                    Envelope::new(
                        tag,
                        Message::HelloResponse(HelloResponse {
                            outcome: Err(failure.clone()),
                        }),
                    ),
                    Outcome::Failed(failure),
                )
            }
        }
    }

    fn on_response(
        &mut self,
        tag: Tag,
        response: BeginAuthenticationResponse,
        password: &Password,
    ) -> Step {
        let HostPhase::AwaitingResponse {
            tag: expected,
            challenge,
            salt,
        } = &self.phase
        else {
            return Step::ignored();
        };
        if tag != *expected {
            warn!(tag, expected = *expected, "{}", constants::ERR_UNEXPECTED_TAG);
            return Step::ignored();
        }
        let request_tag = *expected;

        let verified = match password.expose() {
            Some(secret) => {
                auth::verify_response(secret, challenge, salt, &response.response)
                    .unwrap_or_else(|e| {
                        error!(error = %e, "Response verification failed");
                        false
                    })
            }
            None => {
                error!("{}", constants::ERR_PASSWORD_CONSUMED);
                false
            }
        };

        let failure = if !verified {
            Some(SessionFailure::AuthenticationFailed)
        } else {
            validate_player_name(&response.player_name).err()
        };

        match failure {
            Some(failure) => {
                warn!(player = %response.player_name, error = %failure, "Authentication rejected");
                self.reject(request_tag, failure)
            }
            None => {
                debug!(player = %response.player_name, "Response verified");
                self.phase = HostPhase::Verifying {
                    tag: request_tag,
                    player_name: response.player_name.clone(),
                };
                Step::quiet(Outcome::Verified {
                    player_name: response.player_name,
                })
            }
        }
    }

    fn reject(&mut self, tag: Tag, failure: SessionFailure) -> Step {
        self.phase = HostPhase::Failed;
        Step::send(
            Envelope::new(
                tag,
                Message::EndAuthentication(EndAuthentication {
                    error: Some(failure.clone()),
                }),
            ),
            Outcome::Failed(failure),
        )
    }

    /// Finishes a verified exchange with the caller's admission decision.
    pub fn complete(&mut self, admission: Result<(), SessionFailure>) -> Step {
        let HostPhase::Verifying { tag, player_name } = &self.phase else {
            return Step::ignored();
        };
        let tag = *tag;
        match admission {
            Ok(()) => {
                self.phase = HostPhase::Authenticated {
                    player_name: player_name.clone(),
                };
                Step::send(
                    Envelope::new(
                        tag,
                        Message::EndAuthentication(EndAuthentication { error: None }),
                    ),
                    Outcome::Continue,
                )
            }
            Err(failure) => self.reject(tag, failure),
        }
    }

    /// Marks the handshake as abandoned, e.g. after a timeout.
    pub fn abort(&mut self) {
        self.phase = HostPhase::Failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientPhase {
    Idle,
    AwaitingHello { tag: Tag },
    AwaitingChallenge { version: u32 },
    AwaitingEnd { tag: Tag, version: u32 },
    Established,
    Failed,
}

/// Client end of a connection.
pub struct ClientHandshake {
    phase: ClientPhase,
    tags: TagGenerator,
    player_name: String,
    protocol_version: u32,
}

impl ClientHandshake {
    pub fn new(player_name: impl Into<String>, protocol_version: u32) -> Self {
        Self {
            phase: ClientPhase::Idle,
            tags: TagGenerator::new(),
            player_name: player_name.into(),
            protocol_version,
        }
    }

    pub fn is_established(&self) -> bool {
        self.phase == ClientPhase::Established
    }

    /// Opening HelloRequest.
    pub fn start(&mut self) -> Envelope {
        let tag = self.tags.next_tag();
        self.phase = ClientPhase::AwaitingHello { tag };
        Envelope::new(
            tag,
            Message::HelloRequest(HelloRequest {
                supported_protocol_version: self.protocol_version,
            }),
        )
    }

    /// Advances the exchange. The password is wiped as soon as the
    /// challenge has been answered.
    pub fn handle(&mut self, envelope: Envelope, password: &mut Password) -> Step {
        let Envelope { tag, message } = envelope;
        match (self.phase, message) {
            (ClientPhase::AwaitingHello { tag: expected }, Message::HelloResponse(hello)) => {
                if tag != expected {
                    warn!(tag, expected, "{}", constants::ERR_UNEXPECTED_TAG);
                    return Step::ignored();
                }
                match hello.outcome {
                    Ok(version) => {
                        debug!(version, "Host accepted hello");
                        self.phase = ClientPhase::AwaitingChallenge { version };
                        Step::quiet(Outcome::Continue)
                    }
                    Err(failure) => self.fail(failure),
                }
            }
            (
                ClientPhase::AwaitingChallenge { version },
                Message::BeginAuthenticationRequest(request),
            ) => {
                let Some(secret) = password.expose() else {
                    error!("{}", constants::ERR_PASSWORD_CONSUMED);
                    return self.fail(SessionFailure::AuthenticationFailed);
                };
                let response = auth::compute_response(secret, &request.challenge, &request.salt);
                password.wipe();
                match response {
                    Ok(response) => {
                        self.phase = ClientPhase::AwaitingEnd { tag, version };
                        Step::send(
                            Envelope::new(
                                tag,
                                Message::BeginAuthenticationResponse(BeginAuthenticationResponse {
                                    player_name: self.player_name.clone(),
                                    response,
                                }),
                            ),
                            Outcome::Continue,
                        )
                    }
                    Err(e) => {
                        error!(error = %e, "Could not answer challenge");
                        self.fail(SessionFailure::AuthenticationFailed)
                    }
                }
            }
            (ClientPhase::AwaitingEnd { tag: expected, version }, Message::EndAuthentication(end)) => {
                if tag != expected {
                    warn!(tag, expected, "{}", constants::ERR_UNEXPECTED_TAG);
                    return Step::ignored();
                }
                match end.error {
                    None => {
                        self.phase = ClientPhase::Established;
                        Step::quiet(Outcome::Established {
                            protocol_version: version,
                        })
                    }
                    Some(failure) => self.fail(failure),
                }
            }
            (_, other) => {
                warn!(message = other.kind(), tag, "Unexpected message during handshake");
                Step::ignored()
            }
        }
    }

    fn fail(&mut self, failure: SessionFailure) -> Step {
        warn!(error = %failure, "Handshake failed");
        self.phase = ClientPhase::Failed;
        Step::quiet(Outcome::Failed(failure))
    }
}
