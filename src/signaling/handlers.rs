//! Handlers for each inbound event kind.
//!
//! Every handler runs on the sender's inbound pump. Room changes go through
//! the registry; everything else only enqueues onto recipients' mailboxes.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::client::Client;
use super::messages::{
    self, ChangeRoom, Event, JoinRoom, NewMessage, NewPeer, RelayTarget, RoomInfo, SendMessage,
};
use super::router::Hub;
use super::types::SignalingError;

const USER_JOINED: &str = "user joined";

fn current_room(client: &Client) -> Result<String, SignalingError> {
    client.room().ok_or(SignalingError::NotInRoom)
}

pub(crate) fn send_message<'a>(
    hub: &'a Hub,
    client: &'a Arc<Client>,
    event: Event,
) -> BoxFuture<'a, Result<(), SignalingError>> {
    Box::pin(async move {
        let chat: SendMessage = event.parse_payload()?;
        let room = current_room(client)?;

        let outgoing = Event::new(
            messages::NEW_MESSAGE,
            &NewMessage {
                message: chat.message,
                from: client.id().to_string(),
                sent: Utc::now(),
            },
        )?
        .encode()?;

        let members = hub.registry().members_of(&room);
        let delivered = hub.deliver(&members, &outgoing).await;
        debug!(
            "Message from {} delivered to {}/{} in {}",
            client.id(),
            delivered,
            members.len(),
            room
        );
        Ok(())
    })
}

pub(crate) fn change_room<'a>(
    hub: &'a Hub,
    client: &'a Arc<Client>,
    event: Event,
) -> BoxFuture<'a, Result<(), SignalingError>> {
    Box::pin(async move {
        let change: ChangeRoom = event.parse_payload()?;
        let members = hub.registry().move_to_room(client, &change.room);
        info!("Client {} changed room to {}", client.id(), change.room);

        let outgoing = Event::new(
            messages::NEW_MESSAGE,
            &NewMessage {
                message: USER_JOINED.to_string(),
                from: client.id().to_string(),
                sent: Utc::now(),
            },
        )?
        .encode()?;

        hub.deliver(&members, &outgoing).await;
        Ok(())
    })
}

/// Move the sender and run the two-event handshake: every member gets the
/// room snapshot, then everyone but the joiner gets a `new_peer` for it.
pub(crate) fn join_room<'a>(
    hub: &'a Hub,
    client: &'a Arc<Client>,
    event: Event,
) -> BoxFuture<'a, Result<(), SignalingError>> {
    Box::pin(async move {
        let join: JoinRoom = event.parse_payload()?;
        if let Some(claimed) = join.user_id.as_deref() {
            if claimed != client.id().as_str() {
                debug!("Client {} claimed user_id {}, ignoring", client.id(), claimed);
            }
        }

        let members = hub.registry().move_to_room(client, &join.room);
        info!(
            "Client {} ({}) joined room {} ({} members)",
            client.id(),
            client.username(),
            join.room,
            members.len()
        );

        let room_info = Event::new(
            messages::ROOM_INFO,
            &RoomInfo {
                room: join.room.clone(),
                user_id: client.id(),
                users: members.iter().map(|c| c.id()).collect(),
            },
        )?
        .encode()?;
        let new_peer = Event::new(
            messages::NEW_PEER,
            &NewPeer {
                room: join.room.clone(),
                user_id: client.id(),
            },
        )?
        .encode()?;

        join_all(members.iter().map(|member| {
            let room_info = room_info.clone();
            let new_peer = new_peer.clone();
            async move {
                if !hub.deliver_to(member, room_info).await {
                    return;
                }
                if member.id() != client.id() {
                    hub.deliver_to(member, new_peer).await;
                }
            }
        }))
        .await;
        Ok(())
    })
}

/// Forward `offer`, `answer` or `ice_candidate` to the member of the
/// sender's room whose id is `to`. The hub only stamps `from`; every other
/// field goes through as sent. No such member means the event is dropped.
pub(crate) fn relay<'a>(
    hub: &'a Hub,
    client: &'a Arc<Client>,
    event: Event,
) -> BoxFuture<'a, Result<(), SignalingError>> {
    Box::pin(async move {
        let target: RelayTarget = event.parse_payload()?;
        let mut fields: Map<String, Value> = event.parse_payload()?;
        let room = current_room(client)?;

        let Some(recipient) = hub
            .registry()
            .members_of(&room)
            .into_iter()
            .find(|c| c.id().as_str() == target.to)
        else {
            debug!(
                "No {} in room {} for {} from {}",
                target.to,
                room,
                event.kind(),
                client.id()
            );
            return Ok(());
        };

        fields.insert("from".to_string(), Value::String(client.id().to_string()));
        let outgoing = Event::new(event.kind(), &fields)?.encode()?;
        hub.deliver_to(&recipient, outgoing).await;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::signaling::client::Mailbox;
    use crate::signaling::types::OutboundMessage;

    fn frame(kind: &str, payload: Value) -> Event {
        Event::decode(json!({ "type": kind, "payload": payload }).to_string().as_bytes()).unwrap()
    }

    fn connect(hub: &Hub, name: &str) -> (Arc<Client>, Mailbox) {
        let (client, mailbox) = Client::new(name, 16);
        hub.register(client.clone());
        (client, mailbox)
    }

    async fn connect_in(hub: &Hub, name: &str, room: &str) -> (Arc<Client>, Mailbox) {
        let (client, mailbox) = connect(hub, name);
        hub.dispatch(frame(messages::CHANGE_ROOM, json!({ "room": room })), &client)
            .await
            .unwrap();
        drain(&mailbox);
        (client, mailbox)
    }

    fn drain(mailbox: &Mailbox) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = mailbox.try_recv() {
            out.push(serde_json::from_str(msg.as_str()).unwrap());
        }
        out
    }

    fn id_of(client: &Client) -> Value {
        Value::String(client.id().to_string())
    }

    #[tokio::test]
    async fn send_message_reaches_room_including_sender() {
        let hub = Hub::default();
        let (a, a_rx) = connect_in(&hub, "A", "lobby").await;
        let (_b, b_rx) = connect_in(&hub, "B", "lobby").await;
        let (_c, c_rx) = connect_in(&hub, "C", "kitchen").await;
        drain(&a_rx);

        hub.dispatch(
            frame(messages::SEND_MESSAGE, json!({ "message": "hi", "from": "A" })),
            &a,
        )
        .await
        .unwrap();

        for rx in [&a_rx, &b_rx] {
            let got = drain(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0]["type"], "new_message");
            assert_eq!(got[0]["payload"]["message"], "hi");
            assert_eq!(got[0]["payload"]["from"], id_of(&a));
            let sent = got[0]["payload"]["sent"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(sent).is_ok());
        }
        assert!(drain(&c_rx).is_empty());
    }

    #[tokio::test]
    async fn send_message_stamps_sender_identity() {
        let hub = Hub::default();
        let (a, a_rx) = connect_in(&hub, "A", "lobby").await;

        hub.dispatch(
            frame(messages::SEND_MESSAGE, json!({ "message": "hi", "from": "mallory" })),
            &a,
        )
        .await
        .unwrap();

        assert_eq!(drain(&a_rx)[0]["payload"]["from"], id_of(&a));
    }

    #[tokio::test]
    async fn send_message_without_room_fails() {
        let hub = Hub::default();
        let (a, a_rx) = connect(&hub, "A");
        let err = hub
            .dispatch(frame(messages::SEND_MESSAGE, json!({ "message": "hi" })), &a)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::NotInRoom));
        assert!(drain(&a_rx).is_empty());
    }

    #[tokio::test]
    async fn change_room_announces_to_new_room_only() {
        let hub = Hub::default();
        let (a, a_rx) = connect_in(&hub, "A", "lobby").await;
        let (_b, b_rx) = connect_in(&hub, "B", "kitchen").await;
        let (_c, c_rx) = connect_in(&hub, "C", "lobby").await;
        drain(&a_rx);

        hub.dispatch(frame(messages::CHANGE_ROOM, json!({ "room": "kitchen" })), &a)
            .await
            .unwrap();

        assert!(a.in_room("kitchen"));
        let got = drain(&b_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "new_message");
        assert_eq!(got[0]["payload"]["message"], USER_JOINED);
        assert_eq!(got[0]["payload"]["from"], id_of(&a));
        assert_eq!(drain(&a_rx).len(), 1);
        assert!(drain(&c_rx).is_empty());
    }

    #[tokio::test]
    async fn join_room_handshake() {
        let hub = Hub::default();
        let (a, a_rx) = connect(&hub, "A");
        let (b, b_rx) = connect(&hub, "B");
        let (c, c_rx) = connect(&hub, "C");
        hub.dispatch(frame(messages::JOIN_ROOM, json!({ "room": "call" })), &a)
            .await
            .unwrap();
        hub.dispatch(frame(messages::JOIN_ROOM, json!({ "room": "call" })), &b)
            .await
            .unwrap();
        drain(&a_rx);
        drain(&b_rx);

        hub.dispatch(
            frame(messages::JOIN_ROOM, json!({ "room": "call", "user_id": "C" })),
            &c,
        )
        .await
        .unwrap();

        let got = drain(&c_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "room_info");
        assert_eq!(got[0]["payload"]["room"], "call");
        assert_eq!(got[0]["payload"]["user_id"], id_of(&c));
        let mut users: Vec<String> = got[0]["payload"]["users"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u.as_str().unwrap().to_string())
            .collect();
        users.sort();
        let mut expected: Vec<String> = [&a, &b, &c].iter().map(|x| x.id().to_string()).collect();
        expected.sort();
        assert_eq!(users, expected);

        for rx in [&a_rx, &b_rx] {
            let got = drain(rx);
            assert_eq!(got.len(), 2);
            assert_eq!(got[0]["type"], "room_info");
            assert_eq!(got[1]["type"], "new_peer");
            assert_eq!(got[1]["payload"]["user_id"], id_of(&c));
            assert_eq!(got[1]["payload"]["room"], "call");
        }
    }

    #[tokio::test]
    async fn shared_login_name_still_gives_distinct_peers() {
        let hub = Hub::default();
        let (a, a_rx) = connect(&hub, "ardhi");
        let (b, b_rx) = connect(&hub, "ardhi");
        hub.dispatch(frame(messages::JOIN_ROOM, json!({ "room": "call" })), &a)
            .await
            .unwrap();
        hub.dispatch(frame(messages::JOIN_ROOM, json!({ "room": "call" })), &b)
            .await
            .unwrap();

        let info = drain(&b_rx).remove(0);
        let users = info["payload"]["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_ne!(users[0], users[1]);

        let a_events = drain(&a_rx);
        assert_eq!(a_events.last().unwrap()["payload"]["user_id"], id_of(&b));

        hub.dispatch(frame(messages::OFFER, json!({ "to": "ardhi", "sdp": "v=0" })), &a)
            .await
            .unwrap();
        assert!(drain(&a_rx).is_empty());
        assert!(drain(&b_rx).is_empty());

        hub.dispatch(
            frame(messages::OFFER, json!({ "to": b.id().to_string(), "sdp": "v=0" })),
            &a,
        )
        .await
        .unwrap();
        assert!(drain(&a_rx).is_empty());
        let got = drain(&b_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["payload"]["from"], id_of(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn join_handshake_skips_stuck_member_after_one_timeout() {
        let hub = Hub::new(Duration::from_secs(1));
        let (a, a_rx) = connect(&hub, "A");
        let (stuck, stuck_rx) = Client::new("S", 1);
        hub.register(stuck.clone());
        hub.registry().move_to_room(&a, "call");
        hub.registry().move_to_room(&stuck, "call");
        assert!(hub.deliver_to(&stuck, OutboundMessage::from("{}".to_string())).await);
        let (c, c_rx) = connect(&hub, "C");

        let started = Instant::now();
        hub.dispatch(frame(messages::JOIN_ROOM, json!({ "room": "call" })), &c)
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));

        let got = drain(&a_rx);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0]["type"], "room_info");
        assert_eq!(got[1]["type"], "new_peer");
        assert_eq!(got[1]["payload"]["user_id"], id_of(&c));
        assert_eq!(drain(&c_rx).len(), 1);
        assert_eq!(drain(&stuck_rx), vec![json!({})]);
    }

    #[tokio::test(start_paused = true)]
    async fn join_handshake_new_peer_times_out_on_its_own() {
        let hub = Hub::new(Duration::from_secs(1));
        let (a, a_rx) = connect(&hub, "A");
        let (stuck, stuck_rx) = Client::new("S", 2);
        hub.register(stuck.clone());
        hub.registry().move_to_room(&a, "call");
        hub.registry().move_to_room(&stuck, "call");
        assert!(hub.deliver_to(&stuck, OutboundMessage::from("{}".to_string())).await);
        let (c, _c_rx) = connect(&hub, "C");

        let started = Instant::now();
        hub.dispatch(frame(messages::JOIN_ROOM, json!({ "room": "call" })), &c)
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));

        let stuck_got = drain(&stuck_rx);
        assert_eq!(stuck_got.len(), 2);
        assert_eq!(stuck_got[1]["type"], "room_info");

        let got = drain(&a_rx);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0]["type"], "room_info");
        assert_eq!(got[1]["type"], "new_peer");
    }

    #[tokio::test]
    async fn relay_targets_only_named_peer() {
        let hub = Hub::default();
        let (a, a_rx) = connect_in(&hub, "A", "call").await;
        let (b, b_rx) = connect_in(&hub, "B", "call").await;
        let (_c, c_rx) = connect_in(&hub, "C", "call").await;
        drain(&a_rx);
        drain(&b_rx);
        drain(&c_rx);

        hub.dispatch(
            frame(
                messages::OFFER,
                json!({ "from": "C", "to": b.id().to_string(), "sdp": "v=0" }),
            ),
            &a,
        )
        .await
        .unwrap();

        let got = drain(&b_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "offer");
        assert_eq!(got[0]["payload"]["from"], id_of(&a));
        assert_eq!(got[0]["payload"]["to"], id_of(&b));
        assert_eq!(got[0]["payload"]["sdp"], "v=0");
        assert!(drain(&a_rx).is_empty());
        assert!(drain(&c_rx).is_empty());
    }

    #[tokio::test]
    async fn relay_does_not_cross_rooms() {
        let hub = Hub::default();
        let (a, _a_rx) = connect_in(&hub, "A", "call").await;
        let (b, b_rx) = connect_in(&hub, "B", "elsewhere").await;
        drain(&b_rx);

        hub.dispatch(
            frame(messages::ANSWER, json!({ "to": b.id().to_string(), "sdp": "v=0" })),
            &a,
        )
        .await
        .unwrap();

        assert!(drain(&b_rx).is_empty());
    }

    #[tokio::test]
    async fn relay_to_missing_peer_is_dropped() {
        let hub = Hub::default();
        let (a, a_rx) = connect_in(&hub, "A", "call").await;
        hub.dispatch(frame(messages::ANSWER, json!({ "to": "nobody", "sdp": "v=0" })), &a)
            .await
            .unwrap();
        assert!(drain(&a_rx).is_empty());
    }

    #[tokio::test]
    async fn ice_candidate_is_forwarded_as_sent() {
        let hub = Hub::default();
        let (a, _a_rx) = connect_in(&hub, "A", "call").await;
        let (b, b_rx) = connect_in(&hub, "B", "call").await;
        drain(&b_rx);

        let candidate = json!({
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host",
            "sdp_mid": null,
            "sdp_m_line_index": 0,
            "username_fragment": "uf"
        });
        hub.dispatch(
            frame(
                messages::ICE_CANDIDATE,
                json!({ "to": b.id().to_string(), "candidate": candidate, "trickle": true }),
            ),
            &a,
        )
        .await
        .unwrap();

        let got = drain(&b_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "ice_candidate");
        assert_eq!(
            got[0]["payload"],
            json!({
                "from": a.id().to_string(),
                "to": b.id().to_string(),
                "candidate": candidate,
                "trickle": true
            })
        );
    }

    #[tokio::test]
    async fn relay_without_string_target_is_an_error() {
        let hub = Hub::default();
        let (a, _a_rx) = connect_in(&hub, "A", "call").await;
        for payload in [
            json!({ "candidate": { "candidate": "c" } }),
            json!({ "to": 7, "sdp": "v=0" }),
            json!("B"),
        ] {
            let err = hub
                .dispatch(frame(messages::ICE_CANDIDATE, payload), &a)
                .await
                .unwrap_err();
            assert!(matches!(err, SignalingError::MalformedPayload { .. }));
        }
    }
}
