mod common;

use common::FlakyStore;
use notelink_core::{
    Direction, EntityStore, LinkService, LinkServiceError, MemoryEntityStore, NewNote, Note,
    NoteId, NotePatch, SqliteEntityStore,
};
use std::sync::Arc;

async fn note<S: EntityStore>(service: &LinkService<S>, title: &str) -> Note {
    service.create_note(NewNote::titled(title)).await.unwrap()
}

async fn links_of<S: EntityStore>(service: &LinkService<S>, id: NoteId) -> notelink_core::Adjacency {
    service.neighbors(id).await.unwrap()
}

async fn relink_moves_both_sides<S: EntityStore>(service: LinkService<S>) {
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    let c = note(&service, "C").await;

    service.set_link(a.id, b.id, Direction::Up).await.unwrap();
    assert_eq!(links_of(&service, a.id).await.up, Some(b.id));
    assert_eq!(links_of(&service, b.id).await.down, Some(a.id));

    service.set_link(a.id, c.id, Direction::Up).await.unwrap();
    assert_eq!(links_of(&service, a.id).await.up, Some(c.id));
    assert_eq!(links_of(&service, b.id).await.down, None);
    assert_eq!(links_of(&service, c.id).await.down, Some(a.id));
    assert!(service.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn set_link_relink_clears_old_partner_in_memory() {
    relink_moves_both_sides(LinkService::new(Arc::new(MemoryEntityStore::new()))).await;
}

#[tokio::test]
async fn set_link_relink_clears_old_partner_in_sqlite() {
    let store = SqliteEntityStore::open_in_memory().unwrap();
    relink_moves_both_sides(LinkService::new(Arc::new(store))).await;
}

#[tokio::test]
async fn left_right_links_are_symmetric() {
    let service = LinkService::new(Arc::new(MemoryEntityStore::new()));
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;

    service.set_link(a.id, b.id, Direction::Right).await.unwrap();

    assert_eq!(links_of(&service, a.id).await.right, Some(b.id));
    assert_eq!(links_of(&service, b.id).await.left, Some(a.id));
}

#[tokio::test]
async fn remove_link_is_idempotent() {
    let service = LinkService::new(Arc::new(MemoryEntityStore::new()));
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    service.set_link(a.id, b.id, Direction::Left).await.unwrap();

    service.remove_link(a.id, Direction::Left).await.unwrap();
    let after_once = (links_of(&service, a.id).await, links_of(&service, b.id).await);
    service.remove_link(a.id, Direction::Left).await.unwrap();
    let after_twice = (links_of(&service, a.id).await, links_of(&service, b.id).await);

    assert_eq!(after_once, after_twice);
    assert!(after_once.0.is_empty());
    assert!(after_once.1.is_empty());
}

#[tokio::test]
async fn missing_notes_are_reported() {
    let service = LinkService::new(Arc::new(MemoryEntityStore::new()));
    let a = note(&service, "A").await;
    let ghost = uuid::Uuid::new_v4();

    let err = service.set_link(a.id, ghost, Direction::Down).await.unwrap_err();
    assert!(matches!(err, LinkServiceError::NoteNotFound(id) if id == ghost));
    assert!(links_of(&service, a.id).await.is_empty());
}

async fn delete_clears_every_pointer<S: EntityStore>(service: LinkService<S>) {
    let x = note(&service, "X").await;
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    service.set_link(a.id, x.id, Direction::Up).await.unwrap();
    service.set_link(b.id, x.id, Direction::Left).await.unwrap();

    service.delete_note(x.id).await.unwrap();

    assert!(service.store().get_note(x.id).await.unwrap().is_none());
    for note in service.store().list_notes().await.unwrap() {
        assert!(note.links.directions_to(x.id).is_empty());
    }
    assert!(service.audit().await.unwrap().is_empty());

    // Deleting again only re-checks pointers.
    service.delete_note(x.id).await.unwrap();
}

#[tokio::test]
async fn delete_note_clears_pointers_in_memory() {
    delete_clears_every_pointer(LinkService::new(Arc::new(MemoryEntityStore::new()))).await;
}

#[tokio::test]
async fn delete_note_clears_pointers_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteEntityStore::open(dir.path().join("notelink.db")).unwrap();
    delete_clears_every_pointer(LinkService::new(Arc::new(store))).await;
}

#[tokio::test]
async fn home_flag_stays_singular() {
    let service = LinkService::new(Arc::new(SqliteEntityStore::open_in_memory().unwrap()));
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    let c = note(&service, "C").await;

    for id in [a.id, b.id, b.id, c.id, a.id] {
        service.set_home(id).await.unwrap();
        let homes = service.store().find_home_notes().await.unwrap();
        assert_eq!(homes.len(), 1);
        assert_eq!(homes[0].id, id);
    }

    service.clear_home().await.unwrap();
    assert!(service.home().await.unwrap().is_none());
}

#[tokio::test]
async fn partial_set_link_converges_on_retry() {
    let store = Arc::new(FlakyStore::new(MemoryEntityStore::new()));
    let service = LinkService::new(store.clone());
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    let c = note(&service, "C").await;
    service.set_link(a.id, b.id, Direction::Up).await.unwrap();

    // Write 1 clears B.down, write 2 (C.down = A) fails.
    store.fail_nth_update(2);
    let err = service.set_link(a.id, c.id, Direction::Up).await.unwrap_err();
    match &err {
        LinkServiceError::PartialWrite { completed, .. } => assert_eq!(*completed, 1),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());

    service.set_link(a.id, c.id, Direction::Up).await.unwrap();
    assert_eq!(links_of(&service, a.id).await.up, Some(c.id));
    assert_eq!(links_of(&service, b.id).await.down, None);
    assert_eq!(links_of(&service, c.id).await.down, Some(a.id));
    assert!(service.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_on_last_set_link_write_converges_on_retry() {
    let store = Arc::new(FlakyStore::new(MemoryEntityStore::new()));
    let service = LinkService::new(store.clone());
    let a = note(&service, "A").await;
    let c = note(&service, "C").await;

    store.fail_nth_update(2);
    let err = service.set_link(a.id, c.id, Direction::Down).await.unwrap_err();
    assert!(matches!(err, LinkServiceError::PartialWrite { .. }));

    service.set_link(a.id, c.id, Direction::Down).await.unwrap();
    assert_eq!(links_of(&service, a.id).await.down, Some(c.id));
    assert_eq!(links_of(&service, c.id).await.up, Some(a.id));
}

#[tokio::test]
async fn failed_first_write_is_not_partial() {
    let store = Arc::new(FlakyStore::new(MemoryEntityStore::new()));
    let service = LinkService::new(store.clone());
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;

    store.fail_nth_update(1);
    let err = service.set_link(a.id, b.id, Direction::Up).await.unwrap_err();
    assert!(matches!(err, LinkServiceError::Store(_)));
    assert!(links_of(&service, a.id).await.is_empty());
    assert!(links_of(&service, b.id).await.is_empty());
}

#[tokio::test]
async fn interrupted_set_home_reports_home_unset_and_recovers() {
    let store = Arc::new(FlakyStore::new(MemoryEntityStore::new()));
    let service = LinkService::new(store.clone());
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    service.set_home(a.id).await.unwrap();

    store.fail_nth_update(2);
    let err = service.set_home(b.id).await.unwrap_err();
    assert!(matches!(err, LinkServiceError::HomeUnset { note_id, .. } if note_id == b.id));
    assert!(service.home().await.unwrap().is_none());

    service.set_home(b.id).await.unwrap();
    assert_eq!(service.home().await.unwrap().map(|note| note.id), Some(b.id));
}

#[tokio::test]
async fn partial_delete_converges_on_retry() {
    let store = Arc::new(FlakyStore::new(MemoryEntityStore::new()));
    let service = LinkService::new(store.clone());
    let x = note(&service, "X").await;
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    service.set_link(a.id, x.id, Direction::Up).await.unwrap();
    service.set_link(b.id, x.id, Direction::Right).await.unwrap();

    store.fail_nth_update(2);
    let err = service.delete_note(x.id).await.unwrap_err();
    assert!(matches!(err, LinkServiceError::PartialWrite { .. }));
    assert!(store.get_note(x.id).await.unwrap().is_some());

    service.delete_note(x.id).await.unwrap();
    assert!(store.get_note(x.id).await.unwrap().is_none());
    assert!(links_of(&service, a.id).await.is_empty());
    assert!(links_of(&service, b.id).await.is_empty());
}

#[tokio::test]
async fn public_patches_edit_fields_without_touching_links() {
    let service = LinkService::new(Arc::new(SqliteEntityStore::open_in_memory().unwrap()));
    let a = note(&service, "A").await;
    let b = note(&service, "B").await;
    service.set_link(a.id, b.id, Direction::Up).await.unwrap();
    service.set_home(a.id).await.unwrap();

    let store = service.store();
    store.update_note(a.id, &NotePatch::retitle("Renamed")).await.unwrap();
    store.update_note(a.id, &NotePatch::starred(true)).await.unwrap();

    let stored = store.get_note(a.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Renamed");
    assert!(stored.is_starred);
    assert!(stored.is_home);
    assert_eq!(stored.links.up, Some(b.id));
    assert!(service.audit().await.unwrap().is_empty());
}
