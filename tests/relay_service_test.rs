//! Relay service behavior through in-process channels
//!
//! Each participant is a channel handle plus the receiver its connection
//! writer would drain, so tests observe exactly what would go on the wire.

use std::sync::Arc;

use pairing_relay::protocol::{Identity, MediaState, ServerFrame};
use pairing_relay::registry::{Outbound, PairingOutcome, Presence};
use pairing_relay::relay::{Dispatch, DropReason, RelayService};
use tokio::sync::mpsc;
use tokio_test::assert_ok;

struct Participant {
    identity: Identity,
    connection_id: u64,
    rx: mpsc::Receiver<Outbound>,
}

impl Participant {
    fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn leaves(&mut self) -> Vec<Identity> {
        self.drain()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Frame(ServerFrame::Leave { user }) => Some(user),
                _ => None,
            })
            .collect()
    }
}

async fn join(service: &RelayService, name: &str) -> Participant {
    let (channel, rx) = service.open_channel();
    let connection_id = channel.connection_id();
    service
        .connect(Identity::new(name), channel)
        .await
        .expect("connect");
    Participant {
        identity: Identity::new(name),
        connection_id,
        rx,
    }
}

async fn send(service: &RelayService, from: &Participant, text: &str) -> Dispatch {
    service
        .handle_text(&from.identity, from.connection_id, text)
        .await
}

fn matched(partner: &str) -> Outbound {
    Outbound::Frame(ServerFrame::Match {
        partner: Identity::new(partner),
        media_state: MediaState::default(),
    })
}

#[tokio::test]
async fn test_two_participants_match_each_other() {
    let service = RelayService::new();
    let mut u1 = join(&service, "u1").await;
    assert!(u1.drain().is_empty());
    let mut u2 = join(&service, "u2").await;

    assert_eq!(u1.drain(), vec![matched("u2")]);
    assert_eq!(u2.drain(), vec![matched("u1")]);
    assert_ok!(service.verify_invariants().await);
}

#[tokio::test]
async fn test_media_state_change_forwarded_and_stored() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    let mut u2 = join(&service, "u2").await;
    u2.drain();

    let text = r#"{"type":"media-state-change","user":"u1","mediaState":{"video":false}}"#;
    send(&service, &u1, text).await;

    assert_eq!(u2.drain(), vec![Outbound::Relay(Arc::from(text))]);
    assert_eq!(
        service.media_state(&u1.identity).await,
        Some(MediaState {
            microphone: true,
            video: false
        })
    );
}

#[tokio::test]
async fn test_frame_without_user_relayed_byte_for_byte() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    let mut u2 = join(&service, "u2").await;
    u2.drain();

    send(
        &service,
        &u1,
        r#"{"type":"media-state-change","mediaState":{"video":false},"n":12345678901234567890123}"#,
    )
    .await;

    let expected = r#"{"user":"u1","type":"media-state-change","mediaState":{"video":false},"n":12345678901234567890123}"#;
    assert_eq!(u2.drain(), vec![Outbound::Relay(Arc::from(expected))]);
}

#[tokio::test]
async fn test_media_state_mirrored_to_next_partner() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    send(
        &service,
        &u1,
        r#"{"type":"media-state-change","user":"u1","mediaState":{"microphone":false}}"#,
    )
    .await;

    let mut u2 = join(&service, "u2").await;

    assert_eq!(
        u2.drain(),
        vec![Outbound::Frame(ServerFrame::Match {
            partner: Identity::new("u1"),
            media_state: MediaState {
                microphone: false,
                video: true
            },
        })]
    );
}

#[tokio::test]
async fn test_disconnect_releases_partner_to_next_arrival() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    let mut u2 = join(&service, "u2").await;
    u2.drain();

    assert!(service.disconnect(&u1.identity, u1.connection_id).await);

    assert_eq!(
        u2.drain(),
        vec![Outbound::Frame(ServerFrame::Leave {
            user: Identity::new("u1")
        })]
    );
    assert_eq!(service.presence(&u2.identity).await, Some(Presence::Waiting));

    let mut u3 = join(&service, "u3").await;
    assert_eq!(u3.drain(), vec![matched("u2")]);
    assert_eq!(u2.drain(), vec![matched("u3")]);
    assert_ok!(service.verify_invariants().await);
}

#[tokio::test]
async fn test_disconnect_is_applied_once() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    let mut u2 = join(&service, "u2").await;
    u2.drain();

    assert!(service.disconnect(&u1.identity, u1.connection_id).await);
    assert!(!service.disconnect(&u1.identity, u1.connection_id).await);

    assert_eq!(u2.leaves(), vec![Identity::new("u1")]);
}

#[tokio::test]
async fn test_offer_to_unregistered_partner_is_silent() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    let u2 = join(&service, "u2").await;
    service.disconnect(&u2.identity, u2.connection_id).await;

    let mut u1 = u1;
    u1.drain();
    let dispatch = send(
        &service,
        &u1,
        r#"{"type":"offer","user":"u1","partner":"u2","sdp":{}}"#,
    )
    .await;

    assert!(matches!(dispatch, Dispatch::Dropped(_)));
    assert!(u1.drain().is_empty());
}

#[tokio::test]
async fn test_next_property() {
    let service = RelayService::new();
    let a = join(&service, "a").await;
    let mut b = join(&service, "b").await;
    let _c = join(&service, "c").await;
    b.drain();

    let dispatch = send(&service, &a, r#"{"type":"next","user":"a"}"#).await;

    // b gets exactly one leave and is back in the pool or re-paired
    assert_eq!(b.leaves(), vec![Identity::new("a")]);
    assert!(matches!(
        service.presence(&b.identity).await,
        Some(Presence::Waiting | Presence::Paired(_))
    ));
    // a attempted re-pairing
    assert!(matches!(
        dispatch,
        Dispatch::Next(PairingOutcome::Matched(_) | PairingOutcome::Waiting)
    ));
    assert!(matches!(
        service.presence(&a.identity).await,
        Some(Presence::Waiting | Presence::Paired(_))
    ));

    let stats = service.registry_stats().await;
    assert_eq!(stats.pairs, 1);
    assert_eq!(stats.available, 1);
    assert_ok!(service.verify_invariants().await);
}

#[tokio::test]
async fn test_leave_then_next_requeues() {
    let service = RelayService::new();
    let u1 = join(&service, "u1").await;
    let mut u2 = join(&service, "u2").await;
    u2.drain();

    let dispatch = send(&service, &u1, r#"{"type":"leave","user":"u1","partner":"u2"}"#).await;
    assert_eq!(
        dispatch,
        Dispatch::Left {
            partner: Identity::new("u2")
        }
    );
    assert_eq!(service.presence(&u1.identity).await, Some(Presence::Idle));
    assert_eq!(service.presence(&u2.identity).await, Some(Presence::Waiting));

    let dispatch = send(&service, &u1, r#"{"type":"next","user":"u1"}"#).await;
    assert_eq!(
        dispatch,
        Dispatch::Next(PairingOutcome::Matched(Identity::new("u2")))
    );
}

#[tokio::test]
async fn test_all_waiting_participants_pair() {
    for n in 0..12usize {
        let service = RelayService::new();
        let mut participants = Vec::new();
        for i in 0..n {
            participants.push(join(&service, &format!("p{i}")).await);
        }

        let stats = service.registry_stats().await;
        assert_eq!(stats.connected, n);
        assert_eq!(stats.pairs, n / 2);
        assert_eq!(stats.available, n % 2);

        let pairings = service.pairings().await;
        for (a, b) in &pairings {
            assert_ne!(a, b);
            assert_eq!(pairings.get(b), Some(a));
        }
        assert_ok!(service.verify_invariants().await);
    }
}

#[tokio::test]
async fn test_concurrent_joins_keep_invariants() {
    let service = Arc::new(RelayService::new());
    let mut handles = Vec::new();
    for i in 0..64 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let (channel, rx) = service.open_channel();
            service
                .connect(Identity::new(format!("p{i}")), channel)
                .await
                .unwrap();
            rx
        }));
    }
    let mut receivers = Vec::new();
    for handle in handles {
        receivers.push(handle.await.unwrap());
    }

    let stats = service.registry_stats().await;
    assert_eq!(stats.connected, 64);
    assert_eq!(stats.pairs, 32);
    assert_eq!(stats.available, 0);
    assert_ok!(service.verify_invariants().await);

    // every participant received exactly one match
    for rx in &mut receivers {
        let mut matches = 0;
        while let Ok(message) = rx.try_recv() {
            if matches!(message, Outbound::Frame(ServerFrame::Match { .. })) {
                matches += 1;
            }
        }
        assert_eq!(matches, 1);
    }
}

#[tokio::test]
async fn test_replaced_connection_cannot_act() {
    let service = RelayService::new();
    let mut old = join(&service, "u1").await;
    let mut u2 = join(&service, "u2").await;
    let new = join(&service, "u1").await;
    u2.drain();

    assert!(old.drain().contains(&Outbound::Close));

    let dispatch = send(&service, &old, r#"{"type":"chat","user":"u1","message":"x"}"#).await;
    assert_eq!(dispatch, Dispatch::Dropped(DropReason::StaleChannel));
    assert!(!service.disconnect(&old.identity, old.connection_id).await);

    assert!(matches!(
        service.presence(&new.identity).await,
        Some(Presence::Paired(_))
    ));
    assert_ok!(service.verify_invariants().await);
}

#[tokio::test]
async fn test_admin_reports_and_clear() {
    let service = RelayService::new();
    let mut u1 = join(&service, "u1").await;
    let _u2 = join(&service, "u2").await;
    let _u3 = join(&service, "u3").await;
    u1.drain();

    let clients = service.clients_report().await;
    assert_eq!(clients.count, 3);
    assert_eq!(
        clients.clients,
        vec![Identity::new("u1"), Identity::new("u2"), Identity::new("u3")]
    );

    let pairings = service.pairings_report().await;
    assert_eq!(pairings.count, 1);
    assert_eq!(pairings.pairings.len(), 2);

    let cleared = service.clear().await;
    assert_eq!(cleared.removed, 3);
    assert_eq!(u1.drain(), vec![Outbound::Close]);
    assert_eq!(service.clients_report().await.count, 0);
    assert_eq!(service.pairings_report().await.count, 0);
}
