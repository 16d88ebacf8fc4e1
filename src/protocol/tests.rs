// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::error::SessionFailure;
use crate::protocol::auth::Password;
use crate::protocol::handshake::*;
use crate::protocol::message::{
    BeginAuthenticationResponse, EndAuthentication, Envelope, HelloRequest, Message,
    PROTOCOL_VERSION,
};
use crate::protocol::tag::is_valid_tag;

/// Feeds every envelope through the wire encoding, as a real peer would see it.
fn over_the_wire(envelope: Envelope) -> Envelope {
    Envelope::decode(&envelope.encode().expect("encode")).expect("decode")
}

struct Exchange {
    host: HostHandshake,
    client: ClientHandshake,
    host_password: Password,
    client_password: Password,
}

impl Exchange {
    fn new(host_password: &str, client_password: &str) -> Self {
        Self {
            host: HostHandshake::new(PROTOCOL_VERSION),
            client: ClientHandshake::new("bob", PROTOCOL_VERSION),
            host_password: Password::new(host_password),
            client_password: Password::new(client_password),
        }
    }

    /// Runs Hello and the challenge, returning the host's verdict.
    fn run_to_verdict(&mut self) -> Step {
        let hello = over_the_wire(self.client.start());
        let step = self.host.handle(hello, &self.host_password);
        assert_eq!(step.outcome, Outcome::Continue);
        assert_eq!(step.outgoing.len(), 2);

        let mut replies = Vec::new();
        for envelope in step.outgoing {
            let step = self
                .client
                .handle(over_the_wire(envelope), &mut self.client_password);
            assert_eq!(step.outcome, Outcome::Continue);
            replies.extend(step.outgoing);
        }
        assert_eq!(replies.len(), 1);
        self.host
            .handle(over_the_wire(replies.remove(0)), &self.host_password)
    }
}

#[test]
fn test_matching_passwords_establish_session() {
    let mut exchange = Exchange::new("green felt", "green felt");
    let verdict = exchange.run_to_verdict();
    assert_eq!(
        verdict.outcome,
        Outcome::Verified {
            player_name: "bob".to_string()
        }
    );
    assert!(verdict.outgoing.is_empty());
    assert!(exchange.client_password.is_wiped());

    let end = exchange.host.complete(Ok(()));
    assert!(exchange.host.is_authenticated());
    assert_eq!(exchange.host.player_name(), Some("bob"));

    let step = exchange
        .client
        .handle(over_the_wire(end.outgoing[0].clone()), &mut exchange.client_password);
    assert_eq!(
        step.outcome,
        Outcome::Established {
            protocol_version: PROTOCOL_VERSION
        }
    );
    assert!(exchange.client.is_established());
}

#[test]
fn test_wrong_password_fails_both_sides() {
    let mut exchange = Exchange::new("green felt", "blue felt");
    let verdict = exchange.run_to_verdict();
    assert_eq!(
        verdict.outcome,
        Outcome::Failed(SessionFailure::AuthenticationFailed)
    );
    assert!(!exchange.host.is_authenticated());

    let end = verdict.outgoing[0].clone();
    assert!(matches!(
        &end.message,
        Message::EndAuthentication(EndAuthentication { error: Some(SessionFailure::AuthenticationFailed) })
    ));
    let step = exchange
        .client
        .handle(over_the_wire(end), &mut exchange.client_password);
    assert_eq!(
        step.outcome,
        Outcome::Failed(SessionFailure::AuthenticationFailed)
    );
    assert!(!exchange.client.is_established());
}

#[test]
fn test_name_collision_reported_in_end_authentication() {
    let mut exchange = Exchange::new("pw", "pw");
    exchange.run_to_verdict();
    let collision = SessionFailure::PlayerAlreadyConnected("bob".to_string());
    let end = exchange.host.complete(Err(collision.clone()));
    assert_eq!(end.outcome, Outcome::Failed(collision.clone()));

    let step = exchange
        .client
        .handle(over_the_wire(end.outgoing[0].clone()), &mut exchange.client_password);
    assert_eq!(step.outcome, Outcome::Failed(collision));
}

#[test]
fn test_replies_echo_request_tags() {
    let mut host = HostHandshake::new(PROTOCOL_VERSION);
    let mut client = ClientHandshake::new("bob", PROTOCOL_VERSION);
    let host_password = Password::new("pw");
    let mut client_password = Password::new("pw");

    let hello = client.start();
    assert!(is_valid_tag(hello.tag));
    let step = host.handle(hello.clone(), &host_password);
    assert_eq!(step.outgoing[0].tag, hello.tag);
    let challenge = step.outgoing[1].clone();
    assert!(is_valid_tag(challenge.tag));

    client.handle(step.outgoing[0].clone(), &mut client_password);
    let reply = client.handle(challenge.clone(), &mut client_password);
    assert_eq!(reply.outgoing[0].tag, challenge.tag);

    host.handle(reply.outgoing[0].clone(), &host_password);
    let end = host.complete(Ok(()));
    assert_eq!(end.outgoing[0].tag, challenge.tag);
}

#[test]
fn test_cross_talk_is_ignored() {
    let mut host = HostHandshake::new(PROTOCOL_VERSION);
    let host_password = Password::new("pw");
    let step = host.handle(
        Envelope::new(
            1,
            Message::HelloRequest(HelloRequest {
                supported_protocol_version: PROTOCOL_VERSION,
            }),
        ),
        &host_password,
    );
    let challenge_tag = step.outgoing[1].tag;

    let stray = Envelope::new(
        challenge_tag + 1,
        Message::BeginAuthenticationResponse(BeginAuthenticationResponse {
            player_name: "mallory".to_string(),
            response: vec![0; 32],
        }),
    );
    let step = host.handle(stray, &host_password);
    assert_eq!(step.outcome, Outcome::Ignored);
    assert!(step.outgoing.is_empty());
}

#[test]
fn test_unsupported_version_fails_hello() {
    let mut host = HostHandshake::new(PROTOCOL_VERSION);
    let mut client = ClientHandshake::new("bob", 0);
    let mut client_password = Password::new("pw");

    let step = host.handle(client.start(), &Password::new("pw"));
    assert!(matches!(
        step.outcome,
        Outcome::Failed(SessionFailure::UnsupportedVersion { requested: 0, .. })
    ));
    assert_eq!(step.outgoing.len(), 1);

    let step = client.handle(step.outgoing[0].clone(), &mut client_password);
    assert!(matches!(
        step.outcome,
        Outcome::Failed(SessionFailure::UnsupportedVersion { .. })
    ));
    assert!(!client_password.is_wiped());
}

#[test]
fn test_version_choice_takes_lower() {
    assert_eq!(choose_version(PROTOCOL_VERSION, PROTOCOL_VERSION + 5), Ok(PROTOCOL_VERSION));
    assert!(choose_version(PROTOCOL_VERSION, 0).is_err());
}

#[test]
fn test_invalid_player_name_rejected_after_verification() {
    let mut host = HostHandshake::new(PROTOCOL_VERSION);
    let mut client = ClientHandshake::new("", PROTOCOL_VERSION);
    let host_password = Password::new("pw");
    let mut client_password = Password::new("pw");

    let step = host.handle(client.start(), &host_password);
    let mut reply = Vec::new();
    for envelope in step.outgoing {
        reply.extend(client.handle(envelope, &mut client_password).outgoing);
    }
    let verdict = host.handle(reply.remove(0), &host_password);
    assert!(matches!(
        verdict.outcome,
        Outcome::Failed(SessionFailure::InvalidPlayerName(_))
    ));
}
