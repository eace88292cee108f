mod test_support;

use std::sync::{Arc, Barrier};
use std::thread;

use inbox_module::attachment_store::MemoryAttachmentStore;
use inbox_module::contacts::find_or_create_contact;
use inbox_module::inbox_store::{InboxStore, NewProfile, PostgresInboxStore};
use inbox_module::job_queue::{JobQueue, PostgresJobQueue};
use inbox_module::models::{MailboxOwner, ThreadStatus};
use inbox_module::postmark::PostmarkInbound;
use inbox_module::postman::{PostmanJob, POSTMAN_EVENT};
use inbox_module::threads::{lock_thread, unlock_thread};
use inbox_module::{process_job, WorkerContext};
use uuid::Uuid;

use test_support::require_supabase_db_url;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type TestResult = Result<(), BoxError>;

fn fresh_mailbox(store: &PostgresInboxStore) -> Result<MailboxOwner, BoxError> {
    let suffix = Uuid::new_v4().simple().to_string();
    Ok(store.provision_mailbox(
        &NewProfile {
            full_name: Some("Test Owner".to_string()),
            email: format!("owner-{suffix}@leadmark.test"),
        },
        &format!("inbox-{suffix}"),
        "leadmark.test",
    )?)
}

fn inbound(mailbox: &MailboxOwner, sender: &str, message_id: &str) -> PostmanJob {
    let input = PostmarkInbound {
        from: Some(sender.to_string()),
        from_name: Some("Jane Doe".to_string()),
        to: Some(mailbox.mailbox.address()),
        subject: Some("Quote".to_string()),
        text_body: Some(format!("body of {message_id}")),
        message_id: Some(message_id.to_string()),
        ..Default::default()
    };
    PostmanJob::new(mailbox.clone(), input, message_id.as_bytes())
}

#[test]
fn postgres_concurrent_first_contact_creates_one_row() -> TestResult {
    let Some(db_url) = require_supabase_db_url("postgres_concurrent_first_contact_creates_one_row")
    else {
        return Ok(());
    };
    let store = Arc::new(PostgresInboxStore::new(&db_url)?);
    let mailbox = fresh_mailbox(&store)?;
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = store.clone();
            let mailbox = mailbox.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                find_or_create_contact(store.as_ref(), "Race@Example.com", None, &mailbox)
            })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let resolution = handle.join().expect("contact thread panicked")?;
        if resolution.created {
            created += 1;
        }
        ids.push(resolution.contact.id);
    }
    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(
        store
            .find_contact(mailbox.owner.id, "race@example.com")?
            .map(|contact| contact.id),
        Some(ids[0])
    );
    Ok(())
}

#[test]
fn postgres_redelivered_job_stores_one_inbound_message() -> TestResult {
    let Some(db_url) =
        require_supabase_db_url("postgres_redelivered_job_stores_one_inbound_message")
    else {
        return Ok(());
    };
    let store = PostgresInboxStore::new(&db_url)?;
    let mailbox = fresh_mailbox(&store)?;
    let ctx = WorkerContext::new(Arc::new(store.clone()), Arc::new(MemoryAttachmentStore::new()));
    let delivery = inbound(&mailbox, "redeliver@example.com", "pg-redeliver-1");

    let first = process_job(&ctx, &delivery)?;
    let second = process_job(&ctx, &delivery)?;
    assert!(first.reconciliation.message_created);
    assert!(!second.reconciliation.message_created);
    assert_eq!(second.reconciliation.message.id, first.reconciliation.message.id);

    let messages = store.list_thread_messages(first.reconciliation.thread.thread.id)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].external_id.as_deref(),
        Some(delivery.dedupe_key.as_str())
    );
    Ok(())
}

#[test]
fn postgres_thread_lock_rejects_second_locker() -> TestResult {
    let Some(db_url) = require_supabase_db_url("postgres_thread_lock_rejects_second_locker") else {
        return Ok(());
    };
    let store = PostgresInboxStore::new(&db_url)?;
    let mailbox = fresh_mailbox(&store)?;
    let ctx = WorkerContext::new(Arc::new(store.clone()), Arc::new(MemoryAttachmentStore::new()));

    let outcome = process_job(&ctx, &inbound(&mailbox, "lock@example.com", "pg-lock-1"))?;
    let thread = outcome.reconciliation.thread.thread;
    assert!(outcome.released);

    let first = lock_thread(&store, &thread)?;
    assert!(first.acquired);
    let second = lock_thread(&store, &thread)?;
    assert!(!second.acquired);
    assert_eq!(
        second.current.map(|row| row.status),
        Some(ThreadStatus::Composing)
    );

    let released = unlock_thread(&store, &thread)?;
    assert!(released.acquired);
    let noop = unlock_thread(&store, &thread)?;
    assert!(!noop.acquired);
    assert_eq!(noop.current.map(|row| row.status), Some(ThreadStatus::Open));

    let again = process_job(&ctx, &inbound(&mailbox, "lock@example.com", "pg-lock-2"))?;
    assert!(!again.reconciliation.thread.created);
    assert_eq!(again.reconciliation.thread.thread.id, thread.id);
    assert_eq!(store.list_thread_messages(thread.id)?.len(), 2);
    Ok(())
}

#[test]
fn postgres_queue_dedupes_claims_and_retries() -> TestResult {
    let Some(db_url) = require_supabase_db_url("postgres_queue_dedupes_claims_and_retries") else {
        return Ok(());
    };
    let store = PostgresInboxStore::new(&db_url)?;
    let mailbox = fresh_mailbox(&store)?;
    let table = format!("postman_jobs_test_{}", Uuid::new_v4().simple());
    let queue = PostgresJobQueue::new(&db_url, &table, 60, 2)?;

    let result = (|| -> TestResult {
        let job = inbound(&mailbox, "queue@example.com", "pg-queue-1");
        assert!(queue.enqueue(POSTMAN_EVENT, &job)?.inserted);
        assert!(!queue.enqueue(POSTMAN_EVENT, &job)?.inserted);

        let claimed = queue.claim_next(POSTMAN_EVENT)?.expect("claimed job");
        assert_eq!(claimed.job.dedupe_key, job.dedupe_key);
        assert_eq!(claimed.attempts, 1);
        assert!(queue.claim_next(POSTMAN_EVENT)?.is_none());

        queue.mark_failed(&claimed.id, "transient")?;
        let (status, attempts) = queue.job_state(&claimed.id)?.expect("job row");
        assert_eq!(status, "pending");
        assert_eq!(attempts, 1);

        let other = inbound(&mailbox, "queue@example.com", "pg-queue-2");
        assert!(queue.enqueue(POSTMAN_EVENT, &other)?.inserted);
        let next = queue.claim_next(POSTMAN_EVENT)?.expect("second job");
        assert_eq!(next.job.dedupe_key, other.dedupe_key);
        queue.mark_done(&next.id)?;
        assert_eq!(
            queue.job_state(&next.id)?.map(|(status, _)| status).as_deref(),
            Some("done")
        );
        Ok(())
    })();

    queue.drop_table()?;
    result
}

#[test]
fn postgres_queue_fails_jobs_whose_final_lease_expired() -> TestResult {
    let Some(db_url) =
        require_supabase_db_url("postgres_queue_fails_jobs_whose_final_lease_expired")
    else {
        return Ok(());
    };
    let store = PostgresInboxStore::new(&db_url)?;
    let mailbox = fresh_mailbox(&store)?;
    let table = format!("postman_jobs_test_{}", Uuid::new_v4().simple());
    let queue = PostgresJobQueue::new(&db_url, &table, 0, 1)?;

    let result = (|| -> TestResult {
        let job = inbound(&mailbox, "lease@example.com", "pg-lease-1");
        queue.enqueue(POSTMAN_EVENT, &job)?;
        let claimed = queue.claim_next(POSTMAN_EVENT)?.expect("claimed job");
        assert_eq!(claimed.attempts, 1);

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(queue.claim_next(POSTMAN_EVENT)?.is_none());
        assert_eq!(
            queue.job_state(&claimed.id)?,
            Some(("failed".to_string(), 1))
        );
        Ok(())
    })();

    queue.drop_table()?;
    result
}
