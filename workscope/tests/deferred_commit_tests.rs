//! Integration tests for deferred commit scheduling against ambient and
//! externally supplied transactions

#[path = "testutils/mod.rs"]
mod testutils;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use testutils::init_logging;
use workscope::txn::CompletionCallback;
use workscope::{
    AmbientTransaction, CachePolicy, CacheRegion, DeferredCommitScheduler, LocalTransaction,
    Scheduled, TransactionId, TransactionOutcome, TransactionScope, TransactionSource,
    TransactionStatus,
};

#[test]
fn test_runs_before_schedule_returns_without_transaction() {
    init_logging();
    let scheduler = DeferredCommitScheduler::ambient();
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    let scheduled = scheduler.schedule(move |deferred| {
        assert!(!deferred);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(scheduled, Scheduled::Immediate);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_aborted_transaction_never_runs_actions() {
    init_logging();
    let scheduler = DeferredCommitScheduler::ambient();
    let ran = Arc::new(AtomicUsize::new(0));

    {
        let _scope = TransactionScope::begin();
        for _ in 0..5 {
            let counter = ran.clone();
            scheduler.schedule(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_each_action_runs_at_most_once() {
    init_logging();
    let scheduler = DeferredCommitScheduler::ambient();
    let transaction = LocalTransaction::begin();
    let ran = Arc::new(AtomicUsize::new(0));

    {
        let _ambient = TransactionScope::attach(transaction.clone());
        for _ in 0..10 {
            let counter = ran.clone();
            scheduler.schedule(move |deferred| {
                assert!(deferred);
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    }
    assert_eq!(transaction.pending_callbacks(), 10);

    transaction.commit().unwrap();
    assert!(transaction.commit().is_err());
    assert!(transaction.rollback().is_err());
    assert_eq!(ran.load(Ordering::SeqCst), 10);
}

#[test]
fn test_action_runs_on_committing_thread() {
    init_logging();
    let scheduler = DeferredCommitScheduler::ambient();
    let transaction = LocalTransaction::begin();
    let ran_on = Arc::new(Mutex::new(None));

    {
        let _ambient = TransactionScope::attach(transaction.clone());
        let slot = ran_on.clone();
        scheduler.schedule(move |_| {
            *slot.lock() = Some(thread::current().id());
        });
    }

    let committer = thread::spawn(move || {
        transaction.commit().unwrap();
        thread::current().id()
    });
    let committer_id = committer.join().unwrap();

    assert_eq!(*ran_on.lock(), Some(committer_id));
    assert_ne!(Some(thread::current().id()), *ran_on.lock());
}

#[test]
fn test_cache_write_committed_from_another_thread() {
    init_logging();
    let region: CacheRegion<String, u32> = CacheRegion::new("orders");
    let transaction = LocalTransaction::begin();

    {
        let _ambient = TransactionScope::attach(transaction.clone());
        let value = region
            .get_or_compute("order_1".to_string(), &CachePolicy::default(), || {
                Ok::<_, std::convert::Infallible>(17)
            })
            .unwrap();
        assert_eq!(value, 17);
    }
    assert!(region.is_empty());

    thread::spawn(move || transaction.commit().unwrap())
        .join()
        .unwrap();
    assert_eq!(region.get(&"order_1".to_string()), Some(17));
}

/// Transaction owned by an external coordinator
struct ExternalTransaction {
    id: TransactionId,
    status: Mutex<TransactionStatus>,
    callbacks: Mutex<Vec<CompletionCallback>>,
}

impl ExternalTransaction {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: TransactionId::from_u64(id),
            status: Mutex::new(TransactionStatus::Active),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    fn finish(&self, outcome: TransactionOutcome) {
        *self.status.lock() = match outcome {
            TransactionOutcome::Committed => TransactionStatus::Committed,
            TransactionOutcome::Aborted => TransactionStatus::RolledBack,
        };
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(outcome);
        }
    }
}

impl AmbientTransaction for ExternalTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    fn on_completion(&self, callback: CompletionCallback) {
        self.callbacks.lock().push(callback);
    }
}

struct FixedSource {
    current: Mutex<Option<Arc<ExternalTransaction>>>,
}

impl TransactionSource for FixedSource {
    fn current(&self) -> Option<Arc<dyn AmbientTransaction>> {
        self.current
            .lock()
            .clone()
            .map(|txn| txn as Arc<dyn AmbientTransaction>)
    }
}

#[test]
fn test_external_transaction_source() {
    init_logging();
    let transaction = ExternalTransaction::new(9_000);
    let source = Arc::new(FixedSource {
        current: Mutex::new(Some(transaction.clone())),
    });
    let scheduler = DeferredCommitScheduler::new(source.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    assert_eq!(
        scheduler.schedule(move |deferred| sink.lock().push(deferred)),
        Scheduled::Deferred(TransactionId::from_u64(9_000))
    );
    assert!(seen.lock().is_empty());

    transaction.finish(TransactionOutcome::Committed);
    assert_eq!(*seen.lock(), vec![true]);

    // Once committed, new actions run right away
    let sink = seen.clone();
    assert_eq!(
        scheduler.schedule(move |deferred| sink.lock().push(deferred)),
        Scheduled::Immediate
    );
    assert_eq!(*seen.lock(), vec![true, false]);

    *source.current.lock() = None;
    assert!(!scheduler.would_defer());
}
