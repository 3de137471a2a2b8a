use std::sync::Arc;
use vectormind_core::state::FALLBACK_REPLY;
use vectormind_core::{
    ChatSession, ExchangeState, ExchangeUpdate, MessageRole, MessageStatus,
};
use vectormind_tests::{controller, drain, ChannelTransport, ScriptedTransport};

#[tokio::test]
async fn streamed_reply_lands_once_after_the_question() {
    let transport = ScriptedTransport::new(vec![
        "data: {\"content\":\"Twenty\"}\n",
        "data: {\"content\":\"-five days\"}\ndata: {\"sources\":[{\"filename\":\"hr.pdf\",\"pageNumber\":2,\"relevanceScore\":0.7}]}\n",
        "data: [DONE]\n",
    ]);
    let session = ChatSession::new(controller(Arc::new(transport)));
    let (handle, rx) = session.send_user_message("How much leave?").expect("send");
    let outcome = handle.outcome().await;
    assert_eq!(outcome.state(), ExchangeState::Completed);
    let updates = drain(rx).await;
    assert!(matches!(updates.last(), Some(ExchangeUpdate::Completed(_))));

    let conversation = session.conversation();
    assert_eq!(conversation.title, "How much leave?");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role(), MessageRole::User);
    let reply = &conversation.messages[1];
    assert_eq!(reply.role(), MessageRole::Assistant);
    assert_eq!(reply.content(), "Twenty-five days");
    assert_eq!(reply.status(), MessageStatus::Complete);
    assert_eq!(reply.sources().len(), 1);
}

#[tokio::test]
async fn partial_reply_is_visible_while_streaming() {
    let transport = Arc::new(ChannelTransport::new());
    let connection = transport.connection();
    let session = ChatSession::new(controller(transport));
    let (handle, mut rx) = session.send_user_message("question").expect("send");

    connection.chunk("data: {\"content\":\"so far\"}\n");
    let Some(ExchangeUpdate::Content { message_id, content }) = rx.recv().await else {
        panic!("expected a content update");
    };
    assert_eq!(content, "so far");
    let conversation = session.conversation();
    let partial = conversation.message(message_id).expect("partial in transcript");
    assert_eq!(partial.status(), MessageStatus::Streaming);

    connection.chunk("data: {\"content\":\", done\"}\ndata: [DONE]\n");
    handle.outcome().await;
    let conversation = session.conversation();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(
        conversation.message(message_id).map(|m| m.content()),
        Some("so far, done")
    );
}

#[tokio::test]
async fn failure_without_content_shows_fallback() {
    let session = ChatSession::new(controller(Arc::new(ScriptedTransport::rejecting(502))));
    let (handle, _rx) = session.send_user_message("anyone there?").expect("send");
    assert_eq!(handle.outcome().await.state(), ExchangeState::Failed);

    let conversation = session.conversation();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content(), FALLBACK_REPLY);
}

#[tokio::test]
async fn failure_after_content_keeps_partial() {
    let transport = ScriptedTransport::new(vec![
        "data: {\"content\":\"half an answer\"}\n",
        "data: {\"error\":\"model overloaded\"}\n",
    ]);
    let session = ChatSession::new(controller(Arc::new(transport)));
    let (handle, rx) = session.send_user_message("q").expect("send");
    handle.outcome().await;
    let updates = drain(rx).await;
    assert!(matches!(
        updates.last(),
        Some(ExchangeUpdate::Failed { error, .. }) if error == "model overloaded"
    ));

    let conversation = session.conversation();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content(), "half an answer");
}

#[tokio::test]
async fn cancelled_reply_keeps_streaming_status() {
    let transport = Arc::new(ChannelTransport::new());
    let connection = transport.connection();
    let session = ChatSession::new(controller(transport));
    let (handle, mut rx) = session.send_user_message("long question").expect("send");

    connection.chunk("data: {\"content\":\"interrupted here\"}\n");
    assert!(matches!(rx.recv().await, Some(ExchangeUpdate::Content { .. })));
    assert!(session.cancel());
    handle.outcome().await;

    let conversation = session.conversation();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content(), "interrupted here");
    assert_eq!(conversation.messages[1].status(), MessageStatus::Streaming);
}

#[tokio::test]
async fn cancelled_reply_with_only_sources_is_removed() {
    let transport = Arc::new(ChannelTransport::new());
    let connection = transport.connection();
    let session = ChatSession::new(controller(transport));
    let (handle, mut rx) = session.send_user_message("which policy?").expect("send");

    connection.chunk(
        "data: {\"sources\":[{\"filename\":\"hr.pdf\",\"pageNumber\":1,\"relevanceScore\":0.8}]}\n",
    );
    let Some(ExchangeUpdate::Sources { message_id, .. }) = rx.recv().await else {
        panic!("expected a sources update");
    };
    assert!(session.conversation().message(message_id).is_some());

    assert!(session.cancel());
    assert_eq!(handle.outcome().await.state(), ExchangeState::Cancelled);

    let conversation = session.conversation();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].role(), MessageRole::User);
    assert!(conversation.message(message_id).is_none());
}

#[tokio::test]
async fn rejected_send_leaves_transcript_untouched() {
    let session = ChatSession::new(controller(Arc::new(ScriptedTransport::new(
        Vec::<Vec<u8>>::new(),
    ))));
    assert!(session.send_user_message("  ").is_err());
    assert!(session.conversation().messages.is_empty());
}

#[tokio::test]
async fn fallback_ask_appends_both_messages() {
    let transport = ScriptedTransport::new(Vec::<Vec<u8>>::new())
        .with_reply(r#"{"response":"From the handbook.","sources":[],"conversationId":"default"}"#);
    let session = ChatSession::new(controller(Arc::new(transport)));
    let response = session.ask_user_message("handbook?").await.expect("ask");
    assert_eq!(response.assistant_message.content(), "From the handbook.");

    let conversation = session.conversation();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].content(), "handbook?");
    assert!(conversation.messages[1].is_complete());
}
