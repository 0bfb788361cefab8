use crate::*;

use parley_core::config::TransferConfig;
use parley_core::ChunkKind;
use parley_services::{split_payload, ClientEvent, ClientInbox};

#[tokio::test]
async fn test_broadcast_reaches_everyone_but_sender() -> Result<()> {
    let relay = Relay::tcp().await?;
    let mut alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;
    let mut carol = Client::join(&relay, "carol", false).await?;

    alice.say("hello everyone").await?;

    let expected = "FROM:alice|MSG:hello everyone";
    assert_eq!(bob.expect(|f| f.contains("MSG:")).await?, expected);
    assert_eq!(carol.expect(|f| f.contains("MSG:")).await?, expected);
    alice
        .expect_none(Duration::from_millis(300), |f| f.contains("MSG:"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_join_is_announced_to_existing_users() -> Result<()> {
    let relay = Relay::tcp().await?;
    let mut alice = Client::join(&relay, "alice", false).await?;
    let _bob = Client::join(&relay, "bob", false).await?;

    alice
        .expect(|f| f == "NOTICE:bob has joined the chat")
        .await?;
    alice.expect(|f| f == "USERLIST:alice,bob").await?;
    Ok(())
}

#[tokio::test]
async fn test_private_message_reaches_only_recipient() -> Result<()> {
    let relay = Relay::tcp().await?;
    let alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;
    let mut carol = Client::join(&relay, "carol", false).await?;

    alice.whisper("bob", "psst").await?;

    assert_eq!(
        bob.expect(|f| f.contains("MSG:")).await?,
        "PRIVATE:alice|MSG:psst"
    );
    carol
        .expect_none(Duration::from_millis(300), |f| f.contains("MSG:"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_private_to_unknown_user_notifies_sender() -> Result<()> {
    let relay = Relay::tcp().await?;
    let mut bob = Client::join(&relay, "bob", false).await?;
    let mut dave = Client::join(&relay, "dave", false).await?;

    bob.whisper("carol", "hi").await?;

    bob.expect(|f| f == "NOTICE:User carol is not online").await?;
    dave.expect_none(Duration::from_millis(300), |f| f.contains("MSG:"))
        .await?;
    assert_eq!(relay.node.registry().all(), vec!["bob", "dave"]);
    Ok(())
}

#[tokio::test]
async fn test_image_transfer_is_reassembled_by_receiver() -> Result<()> {
    let relay = Relay::tcp().await?;
    let alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;

    let image: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
    let transfer = split_payload(ChunkKind::Image, &image, "alice", None, None, 400)?;
    assert!(transfer.chunks.len() > 1);
    alice.link.send_transfer(&transfer).await?;

    let (inbox, mut events) = ClientInbox::new("bob", TransferConfig::default());
    let payload = loop {
        let frame = bob.recv().await?;
        inbox.handle_inbound(&frame);
        if let Ok(ClientEvent::Payload(p)) = events.try_recv() {
            break p;
        }
    };

    assert_eq!(payload.kind, ChunkKind::Image);
    assert_eq!(payload.from, "alice");
    assert!(!payload.private);
    assert_eq!(payload.bytes.as_ref(), image.as_slice());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_removes_user_and_updates_membership() -> Result<()> {
    let relay = Relay::tcp().await?;
    let alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;

    alice
        .link
        .send(&Frame::Disconnect {
            username: "alice".into(),
        })
        .await?;

    bob.expect(|f| f == "NOTICE:alice has left the chat").await?;
    bob.expect(|f| f == "USERLIST:bob").await?;
    relay.wait_for_users(&["bob"]).await
}

#[tokio::test]
async fn test_dropped_connection_removes_user() -> Result<()> {
    let relay = Relay::tcp().await?;
    let alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;

    drop(alice);

    bob.expect(|f| f == "NOTICE:alice has left the chat").await?;
    relay.wait_for_users(&["bob"]).await
}

#[tokio::test]
async fn test_reconnect_replaces_handle_without_duplicate() -> Result<()> {
    let relay = Relay::tcp().await?;
    let _old = Client::join(&relay, "alice", false).await?;
    let mut new = Client::join(&relay, "alice", false).await?;
    let bob = Client::join(&relay, "bob", false).await?;

    assert_eq!(relay.node.registry().all(), vec!["alice", "bob"]);

    bob.whisper("alice", "which one?").await?;
    assert_eq!(
        new.expect(|f| f.contains("MSG:")).await?,
        "PRIVATE:bob|MSG:which one?"
    );
    Ok(())
}

#[tokio::test]
async fn test_malformed_lines_do_not_disturb_relay() -> Result<()> {
    let relay = Relay::tcp().await?;
    let alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;

    alice.link.send_raw("IMGCHUNK|SESSION:x|CHUNK:0").await?;
    alice.link.send_raw("total nonsense").await?;
    alice.link.send_raw("").await?;
    alice.say("still here").await?;

    assert_eq!(
        bob.expect(|f| f.contains("MSG:")).await?,
        "FROM:alice|MSG:still here"
    );
    assert_eq!(relay.node.registry().all(), vec!["alice", "bob"]);
    Ok(())
}

#[tokio::test]
async fn test_endless_line_closes_only_that_connection() -> Result<()> {
    let relay = Relay::tcp().await?;
    let mut flooder = Client::join(&relay, "mallory", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;

    // The relay may reset the connection before the write finishes.
    let flood = "A".repeat(parley_services::transport::tcp::MAX_LINE * 2);
    let _ = flooder.link.send_raw(&flood).await;

    bob.expect(|f| f == "NOTICE:mallory has left the chat").await?;
    relay.wait_for_users(&["bob"]).await?;

    let closed = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match flooder.reader.next_frame().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "relay kept the flooding connection open");

    let carol = Client::join(&relay, "carol", false).await?;
    carol.say("relay still up").await?;
    assert_eq!(
        bob.expect(|f| f.contains("MSG:")).await?,
        "FROM:carol|MSG:relay still up"
    );
    Ok(())
}
