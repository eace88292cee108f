mod test_support;

use std::sync::Arc;

use inbox_module::attachment_store::MemoryAttachmentStore;
use inbox_module::inbox_store::{InboxStore, MemoryInboxStore};
use inbox_module::job_queue::{JobQueue, MemoryJobQueue};
use inbox_module::models::{Direction, MessageStatus, ThreadStatus};
use inbox_module::postman::POSTMAN_EVENT;
use inbox_module::reconcile_inbound;
use inbox_module::service::{
    build_router, AllowAllOrigins, AppState, OriginVerifier, SharedTokenVerifier,
    DEFAULT_INBOUND_BODY_MAX_BYTES, POSTMARK_TOKEN_HEADER,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use test_support::{inbound_payload, provision_support_mailbox};

struct TestServer {
    base_url: String,
    store: Arc<MemoryInboxStore>,
    queue: Arc<MemoryJobQueue>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    async fn start(verifier: Arc<dyn OriginVerifier>) -> TestServer {
        let store = Arc::new(MemoryInboxStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        provision_support_mailbox(store.as_ref());

        let state = AppState {
            store: store.clone(),
            queue: queue.clone(),
            verifier,
        };
        let app = build_router(state, DEFAULT_INBOUND_BODY_MAX_BYTES);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
                .expect("serve");
        });

        TestServer {
            base_url: format!("http://{}", addr),
            store,
            queue,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    async fn post(&self, payload: &Value) -> (u16, Value) {
        self.post_raw(serde_json::to_vec(payload).expect("payload"), &[])
            .await
    }

    async fn post_raw(&self, body: Vec<u8>, headers: &[(&str, &str)]) -> (u16, Value) {
        let client = reqwest::Client::new();
        let mut request = client
            .post(format!("{}/api/postman", self.base_url))
            .header("content-type", "application/json")
            .body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.expect("send webhook");
        let status = response.status().as_u16();
        let json = response.json::<Value>().await.expect("json response");
        (status, json)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_ok() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;
    let response = reqwest::get(format!("{}/health", server.base_url))
        .await
        .expect("health request");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body"), "ok");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_contact_creates_contact_thread_and_message() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;

    let (status, body) = server
        .post(&inbound_payload("support@acme.com", "a-1", "Do you ship to Norway?"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "accepted");
    assert_eq!(server.queue.pending().unwrap(), 1);

    let queued = server
        .queue
        .claim_next(POSTMAN_EVENT)
        .unwrap()
        .expect("queued job");
    assert_eq!(queued.job.dedupe_key, format!("postman:{}:a-1@mail.x.com", queued.job.mailbox.mailbox.id));

    let outcome = reconcile_inbound(
        server.store.as_ref(),
        &MemoryAttachmentStore::new(),
        &queued.job,
    )
    .expect("reconcile");

    assert!(outcome.contact.created);
    assert_eq!(outcome.contact.contact.email, "jane@x.com");
    assert_eq!(outcome.contact.contact.first_name.as_deref(), Some("Jane"));
    assert_eq!(outcome.contact.contact.last_name.as_deref(), Some("Doe"));

    assert!(outcome.thread.created);
    assert!(outcome.thread.acquired);
    assert_eq!(outcome.thread.thread.namespace, "support@acme.com:jane@x.com");
    assert_eq!(outcome.thread.thread.status, ThreadStatus::Composing);
    assert_eq!(outcome.thread.thread.subject.as_deref(), Some("Pricing question"));

    let messages = server.store.messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, Direction::Inbound);
    assert_eq!(messages[0].status, MessageStatus::Received);
    assert_eq!(messages[0].content.as_deref(), Some("Do you ship to Norway?"));

    server.queue.mark_done(&queued.id).unwrap();
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_message_while_composing_keeps_lock_and_stores_message() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;
    let attachments = MemoryAttachmentStore::new();

    let (status, _) = server
        .post(&inbound_payload("support@acme.com", "b-1", "First"))
        .await;
    assert_eq!(status, 200);
    let first = server.queue.claim_next(POSTMAN_EVENT).unwrap().expect("first job");
    let first_outcome =
        reconcile_inbound(server.store.as_ref(), &attachments, &first.job).expect("first");
    assert_eq!(first_outcome.thread.thread.status, ThreadStatus::Composing);

    let (status, body) = server
        .post(&inbound_payload("support@acme.com", "b-2", "Second"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "accepted");
    let second = server.queue.claim_next(POSTMAN_EVENT).unwrap().expect("second job");
    let second_outcome =
        reconcile_inbound(server.store.as_ref(), &attachments, &second.job).expect("second");

    assert!(!second_outcome.contact.created);
    assert!(!second_outcome.thread.created);
    assert!(!second_outcome.thread.acquired);
    assert_eq!(second_outcome.thread.thread.id, first_outcome.thread.thread.id);
    assert_eq!(second_outcome.thread.thread.status, ThreadStatus::Composing);

    assert_eq!(server.store.threads().unwrap().len(), 1);
    assert_eq!(server.store.contacts().unwrap().len(), 1);
    let history = server
        .store
        .list_thread_messages(first_outcome.thread.thread.id)
        .unwrap();
    let bodies: Vec<_> = history.iter().filter_map(|m| m.content.as_deref()).collect();
    assert_eq!(bodies, vec!["First", "Second"]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_recipient_is_not_found_without_writes() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;

    let (status, body) = server
        .post(&inbound_payload("not-an-email", "c-1", "Hello?"))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["message"], "Mailbox not found");

    let (status, _) = server
        .post(&inbound_payload("sales@acme.com", "c-2", "Hello?"))
        .await;
    assert_eq!(status, 404);

    assert_eq!(server.queue.pending().unwrap(), 0);
    assert!(server.store.contacts().unwrap().is_empty());
    assert!(server.store.threads().unwrap().is_empty());
    assert!(server.store.messages().unwrap().is_empty());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recipient_matching_ignores_case_and_display_name() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;
    let (status, body) = server
        .post(&inbound_payload("Acme Support <SUPPORT@Acme.COM>", "d-1", "Hi"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "accepted");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redelivery_is_reported_as_duplicate() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;
    let payload = inbound_payload("support@acme.com", "dup-1", "Once");

    let (_, first) = server.post(&payload).await;
    let (status, second) = server.post(&payload).await;
    assert_eq!(first["message"], "accepted");
    assert_eq!(status, 200);
    assert_eq!(second["message"], "duplicate");
    assert_eq!(server.queue.pending().unwrap(), 1);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_json_is_rejected() {
    let server = TestServer::start(Arc::new(AllowAllOrigins)).await;
    let (status, body) = server.post_raw(b"{not json".to_vec(), &[]).await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Invalid JSON payload");
    assert_eq!(server.queue.pending().unwrap(), 0);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_token_guards_the_webhook() {
    let server = TestServer::start(Arc::new(SharedTokenVerifier::new("s3cret"))).await;
    let body = serde_json::to_vec(&inbound_payload("support@acme.com", "t-1", "Hi")).unwrap();

    let (status, reply) = server.post_raw(body.clone(), &[]).await;
    assert_eq!(status, 401);
    assert_eq!(reply["message"], "Unauthorized");

    let (status, _) = server
        .post_raw(body.clone(), &[(POSTMARK_TOKEN_HEADER, "wrong")])
        .await;
    assert_eq!(status, 401);
    assert_eq!(server.queue.pending().unwrap(), 0);

    let (status, reply) = server
        .post_raw(body, &[(POSTMARK_TOKEN_HEADER, "s3cret")])
        .await;
    assert_eq!(status, 200);
    assert_eq!(reply["message"], "accepted");
    server.stop().await;
}
