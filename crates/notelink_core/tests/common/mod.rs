#![allow(dead_code)]

use async_trait::async_trait;
use notelink_core::{
    EntityStore, NewNote, NewTask, Note, NoteId, NotePatch, RefCode, StoreError, StoreResult,
    Task, TaskId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Store wrapper that injects failures and counts calls.
pub struct FlakyStore<S> {
    inner: S,
    updates: AtomicUsize,
    fail_update_at: Mutex<Option<usize>>,
    fail_lookups: AtomicBool,
    ref_lookups: AtomicUsize,
    lookup_delay: Mutex<Option<Duration>>,
}

impl<S: EntityStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            updates: AtomicUsize::new(0),
            fail_update_at: Mutex::new(None),
            fail_lookups: AtomicBool::new(false),
            ref_lookups: AtomicUsize::new(0),
            lookup_delay: Mutex::new(None),
        }
    }

    /// Fails the `nth` update issued from now on (1-based), once.
    pub fn fail_nth_update(&self, nth: usize) {
        let issued = self.updates.load(Ordering::SeqCst);
        *self.fail_update_at.lock() = Some(issued + nth);
    }

    pub fn set_lookup_failure(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// `find_*_by_ref_code` calls observed so far.
    pub fn ref_lookups(&self) -> usize {
        self.ref_lookups.load(Ordering::SeqCst)
    }

    /// Makes every `find_*_by_ref_code` call sleep for `delay` first.
    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock() = Some(delay);
    }

    async fn lookup_guard(&self) -> StoreResult<()> {
        self.ref_lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.lookup_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected lookup failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EntityStore> EntityStore for FlakyStore<S> {
    async fn create_note(&self, request: NewNote) -> StoreResult<Note> {
        self.inner.create_note(request).await
    }

    async fn create_task(&self, request: NewTask) -> StoreResult<Task> {
        self.inner.create_task(request).await
    }

    async fn get_note(&self, id: NoteId) -> StoreResult<Option<Note>> {
        self.inner.get_note(id).await
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn update_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<()> {
        let issued = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        let should_fail = {
            let mut target = self.fail_update_at.lock();
            if *target == Some(issued) {
                *target = None;
                true
            } else {
                false
            }
        };
        if should_fail {
            return Err(StoreError::Unavailable("injected update failure".to_string()));
        }
        self.inner.update_note(id, patch).await
    }

    async fn delete_note(&self, id: NoteId) -> StoreResult<()> {
        self.inner.delete_note(id).await
    }

    async fn find_note_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Note>> {
        self.lookup_guard().await?;
        self.inner.find_note_by_ref_code(code).await
    }

    async fn find_task_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Task>> {
        self.lookup_guard().await?;
        self.inner.find_task_by_ref_code(code).await
    }

    async fn find_notes_pointing_to(&self, id: NoteId) -> StoreResult<Vec<Note>> {
        self.inner.find_notes_pointing_to(id).await
    }

    async fn find_home_notes(&self) -> StoreResult<Vec<Note>> {
        self.inner.find_home_notes().await
    }

    async fn list_notes(&self) -> StoreResult<Vec<Note>> {
        self.inner.list_notes().await
    }
}

pub fn code(value: &str) -> RefCode {
    RefCode::parse(value).unwrap()
}
