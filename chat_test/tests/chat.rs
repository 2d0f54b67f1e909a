use anyhow::Result;
use chat_core::{ChatMessage, MemoryPubSub, Principal};
use chat_server::{
    seeded_directory, AppState as ChatState, Backends, ChatRoomListItem, ChatRoomLists,
    ChatRoomView, ClickPage, OpenChat, SendMessage,
};
use futures::StreamExt;
use notify_server::{AppState as NotifyState, CHAT_MESSAGE_EVENT};
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

struct ChatServer {
    addr: SocketAddr,
    state: ChatState,
    client: reqwest::Client,
}

struct NotifyServer {
    addr: SocketAddr,
}

#[tokio::test]
async fn chat_and_notify_test() -> Result<()> {
    let pubsub = MemoryPubSub::new();
    let chat = ChatServer::new(pubsub.clone()).await?;
    let notify = NotifyServer::new(pubsub).await?;

    let alice = chat.token(Principal::new("u1", "alice"))?;
    let bob = chat.token(Principal::new("u2", "bob"))?;

    let mut alice_events = notify.events(&alice).await?;

    let view = chat.open_chat(&bob, OpenChat::new("p1", "u1", "u2", ClickPage::Detail)).await?;
    assert_eq!(view.sender_id, "u2");
    assert_eq!(view.receiver_id, "u1");
    assert_eq!(view.receiver_nickname, "alice");

    let mut room = chat.room_messages(&alice, &view.id).await?;
    let started = next_message(&mut room).await?;
    assert_eq!(started.body, "Chat started.");

    let sent = chat
        .send_message(&bob, SendMessage::new("is it still available?", "u2", "u1", &view.id))
        .await?;

    let (event, data) = next_event(&mut alice_events).await?;
    assert_eq!(event, CHAT_MESSAGE_EVENT);
    assert_eq!(data, "is it still available?");

    let tailed = next_message(&mut room).await?;
    assert_eq!(tailed, sent);

    let lists = chat.list_rooms(&alice).await?;
    assert!(lists.buyer.is_empty());
    assert_eq!(lists.seller.len(), 1);
    let item: &ChatRoomListItem = &lists.seller[0];
    assert_eq!(item.room_id, view.id);
    assert_eq!(item.product_title, "Used bike");
    assert_eq!(item.buyer_nickname, "bob");
    assert_eq!(item.recent_msg.as_deref(), Some("is it still available?"));

    let recent = chat.recent(&bob, &view.id).await?;
    assert_eq!(recent.id, sent.id);
    Ok(())
}

#[tokio::test]
async fn reopening_chat_should_return_same_room() -> Result<()> {
    let chat = ChatServer::new(MemoryPubSub::new()).await?;
    let bob = chat.token(Principal::new("u2", "bob"))?;
    let alice = chat.token(Principal::new("u1", "alice"))?;

    let first = chat.open_chat(&bob, OpenChat::new("p1", "u1", "u2", ClickPage::Detail)).await?;
    let again = chat.open_chat(&alice, OpenChat::new("p1", "u1", "u2", ClickPage::List)).await?;
    assert_eq!(first.id, again.id);
    assert_eq!(again.sender_id, "u1");
    assert_eq!(again.receiver_id, "u2");
    assert_eq!(again.thumbnail_path, "/img/profile/resized_u2.png");
    Ok(())
}

#[tokio::test]
async fn chat_api_should_reject_requests_without_token() -> Result<()> {
    let chat = ChatServer::new(MemoryPubSub::new()).await?;
    let res = chat
        .client
        .get(format!("http://{}/api/chat-rooms", chat.addr))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = chat
        .client
        .get(format!("http://{}/api/chat-rooms", chat.addr))
        .bearer_auth("garbage")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

async fn next_event(source: &mut EventSource) -> Result<(String, String)> {
    loop {
        match timeout(WAIT, source.next()).await? {
            Some(Ok(Event::Open)) => continue,
            Some(Ok(Event::Message(m))) => return Ok((m.event, m.data)),
            Some(Err(e)) => anyhow::bail!("event source failed: {e}"),
            None => anyhow::bail!("event source closed"),
        }
    }
}

async fn next_message(source: &mut EventSource) -> Result<ChatMessage> {
    let (event, data) = next_event(source).await?;
    assert_eq!(event, CHAT_MESSAGE_EVENT);
    Ok(serde_json::from_str(&data)?)
}

/// Open an event source and wait until the server has accepted it.
async fn open(url: String) -> Result<EventSource> {
    let mut source = EventSource::get(url);
    match timeout(WAIT, source.next()).await? {
        Some(Ok(Event::Open)) => Ok(source),
        other => anyhow::bail!("event source did not open: {other:?}"),
    }
}

async fn bind() -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

impl ChatServer {
    async fn new(pubsub: MemoryPubSub) -> Result<Self> {
        std::env::set_var("CHAT_CONFIG", "../chat_server/app.yaml");
        let config = chat_server::AppConfig::load()?;
        let backends = Backends::in_memory(pubsub, Arc::new(seeded_directory()));
        let state = ChatState::with_backends(config, backends)?;
        let app = chat_server::get_router(state.clone());

        let (listener, addr) = bind().await?;
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .unwrap();
        });

        Ok(Self {
            addr,
            state,
            client: reqwest::Client::new(),
        })
    }

    fn token(&self, principal: Principal) -> Result<String> {
        Ok(self.state.sign(principal)?)
    }

    async fn open_chat(&self, token: &str, input: OpenChat) -> Result<ChatRoomView> {
        let res = self
            .client
            .post(format!("http://{}/api/chat-rooms", self.addr))
            .bearer_auth(token)
            .json(&input)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        Ok(res.json().await?)
    }

    async fn send_message(&self, token: &str, input: SendMessage) -> Result<ChatMessage> {
        let res = self
            .client
            .post(format!("http://{}/api/messages", self.addr))
            .bearer_auth(token)
            .json(&input)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);
        Ok(res.json().await?)
    }

    async fn list_rooms(&self, token: &str) -> Result<ChatRoomLists> {
        let res = self
            .client
            .get(format!("http://{}/api/chat-rooms", self.addr))
            .bearer_auth(token)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        Ok(res.json().await?)
    }

    async fn recent(&self, token: &str, room_id: &str) -> Result<ChatMessage> {
        let res = self
            .client
            .get(format!("http://{}/api/chat-rooms/{room_id}/recent", self.addr))
            .bearer_auth(token)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        Ok(res.json().await?)
    }

    async fn room_messages(&self, token: &str, room_id: &str) -> Result<EventSource> {
        open(format!(
            "http://{}/api/chat-rooms/{room_id}/messages?token={token}",
            self.addr
        ))
        .await
    }
}

impl NotifyServer {
    async fn new(pubsub: MemoryPubSub) -> Result<Self> {
        std::env::set_var("NOTIFY_CONFIG", "../notify_server/notify.yaml");
        let config = notify_server::AppConfig::load()?;
        let state = NotifyState::with_transport(config, Arc::new(pubsub))?;
        let app = notify_server::get_router(state);

        let (listener, addr) = bind().await?;
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .unwrap();
        });

        Ok(Self { addr })
    }

    async fn events(&self, token: &str) -> Result<EventSource> {
        open(format!("http://{}/events?token={token}", self.addr)).await
    }
}
