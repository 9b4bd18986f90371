//! End-to-end tests of the assembled course pool

mod common;

use std::sync::Arc;

use course_pool::config::Config;
use course_pool::layout::{PoolLayout, FIRST_LOCAL_ID};
use course_pool::models::{Category, RankingRecord, RecordKind};
use course_pool::preload::ArchiveDecoder;
use course_pool::{CoursePool, PoolError};
use tempfile::TempDir;

use common::{avatar, remote_course, write_entry, FakeCatalog, PrefixCompressor};

fn config(temp_dir: &TempDir, quotas: Vec<usize>) -> Config {
    let mut config = Config::default();
    config.pool.data_dir = temp_dir.path().join("smmdb");
    config.pool.quotas = quotas;
    config.pool.default_avatar_owner = Some(900);
    config.remote.retry_base_delay_ms = 1;
    config.remote.retry_max_delay_ms = 2;

    let avatars = temp_dir.path().join("avatars.json");
    std::fs::write(
        &avatars,
        serde_json::to_vec(&vec![avatar(300, 900, "default"), avatar(301, 901, "peach")]).unwrap(),
    )
    .unwrap();
    config.preload.avatars = Some(avatars);

    let rankings = temp_dir.path().join("rankings.json");
    let ranking = RankingRecord {
        course_id: 55,
        slot: 0,
        first_clear_owner: 901,
        best_owner: 900,
        best_score: 4200,
        created_at: 1,
        updated_at: 2,
    };
    std::fs::write(&rankings, serde_json::to_vec(&vec![ranking]).unwrap()).unwrap();
    config.preload.rankings = Some(rankings);

    config
}

fn catalog() -> Arc<FakeCatalog> {
    Arc::new(FakeCatalog::new().with_courses(
        Category::Easy,
        (0..6)
            .map(|i| remote_course(&format!("e{}", i), 0, "bowser"))
            .collect(),
    ))
}

#[tokio::test]
async fn test_warm_up_then_serve() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir, vec![2, 0, 0, 0]);
    let pool = CoursePool::start(&config, catalog(), Arc::new(PrefixCompressor), &ArchiveDecoder)
        .await
        .unwrap();

    let report = pool.warm_up().await.unwrap();
    assert_eq!(report.categories[0].written, vec![FIRST_LOCAL_ID, FIRST_LOCAL_ID + 1]);

    // disk course hydrates with a synthesized owner that has an avatar
    let record = pool.lookup_by_id(FIRST_LOCAL_ID).await.unwrap();
    assert_eq!(record.kind, RecordKind::Course);
    assert_eq!(record.display_name, "Course e0");
    assert_eq!(record.owner_id, config.synth.owner_base);
    let owner_avatar = pool.lookup_owner_avatar(record.owner_id).await.unwrap();
    assert_eq!(owner_avatar.display_name, "bowser");
    assert_eq!(owner_avatar.id, config.synth.id_base);

    // same maker, same owner
    let second = pool.lookup_by_id(FIRST_LOCAL_ID + 1).await.unwrap();
    assert_eq!(second.owner_id, record.owner_id);

    assert_eq!(
        pool.course_url(FIRST_LOCAL_ID).await.unwrap(),
        format!("{}/0/10000000000-00001", config.pool.public_base_url)
    );
    assert_eq!(
        pool.read_payload(FIRST_LOCAL_ID).await.unwrap().len() as u64,
        record.payload_size
    );

    assert_eq!(pool.lookup_ranking(55).await.unwrap().best_score, 4200);
    assert!(matches!(pool.lookup_ranking(56).await, Err(PoolError::NotFound(56))));

    assert_eq!(pool.lookup_owner_avatar_or_default(12345).await.unwrap().id, 300);
    assert_eq!(pool.lookup_avatar(301).await.unwrap().owner_id, 901);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_mark_played_queues_one_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir, vec![2, 0, 0, 0]);
    let pool = CoursePool::start(&config, catalog(), Arc::new(PrefixCompressor), &ArchiveDecoder)
        .await
        .unwrap();
    pool.warm_up().await.unwrap();
    let before = pool.queue_stats();

    assert!(!pool.is_played(FIRST_LOCAL_ID).await);
    assert!(pool.mark_played(FIRST_LOCAL_ID).await.unwrap());
    assert!(pool.is_played(FIRST_LOCAL_ID).await);
    assert!(!pool.mark_played(FIRST_LOCAL_ID).await.unwrap());

    let after = pool.queue_stats();
    assert_eq!(
        (after.queued + after.coalesced) - (before.queued + before.coalesced),
        1
    );

    // the triggered cycle replaces the played course
    let report = pool.warm_up().await.unwrap();
    let stats = pool.stats().await;
    let easy = &stats.buckets[0].1;
    assert_eq!(easy.unplayed, 2);
    assert_eq!(easy.played, 1);
    assert!(report.categories[0].fetched <= 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_sample_unplayed_excludes_played_and_fails_short() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir, vec![0, 0, 0, 0]);
    let layout = PoolLayout::new(&config.pool.data_dir);
    layout.ensure_dirs().await.unwrap();
    for i in 0..3 {
        write_entry(&layout, Category::Expert, FIRST_LOCAL_ID + i, "wario");
    }

    let pool = CoursePool::start(&config, catalog(), Arc::new(PrefixCompressor), &ArchiveDecoder)
        .await
        .unwrap();
    pool.mark_played(FIRST_LOCAL_ID + 1).await.unwrap();

    let sample = pool.sample_unplayed(Category::Expert, 2).await.unwrap();
    let mut ids: Vec<u64> = sample.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![FIRST_LOCAL_ID, FIRST_LOCAL_ID + 2]);

    let err = pool.sample_unplayed(Category::Expert, 3).await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::InsufficientPool {
            requested: 3,
            available: 2,
            ..
        }
    ));

    pool.shutdown().await;
}

#[tokio::test]
async fn test_synthesize_owner_is_memoized() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir, vec![0, 0, 0, 0]);
    let pool = CoursePool::start(&config, catalog(), Arc::new(PrefixCompressor), &ArchiveDecoder)
        .await
        .unwrap();

    let a = pool.synthesize_owner("yoshi").await.unwrap();
    let b = pool.synthesize_owner("yoshi").await.unwrap();
    let c = pool.synthesize_owner("birdo").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(c, a + 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_serves_disk_courses_without_avatar_preload() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.pool.data_dir = temp_dir.path().join("smmdb");
    config.pool.quotas = vec![0, 0, 0, 0];
    assert!(config.preload.avatars.is_none());

    let layout = PoolLayout::new(&config.pool.data_dir);
    layout.ensure_dirs().await.unwrap();
    write_entry(&layout, Category::Easy, FIRST_LOCAL_ID, "kamek");

    let pool = CoursePool::start(&config, catalog(), Arc::new(PrefixCompressor), &ArchiveDecoder)
        .await
        .unwrap();

    let default_owner = config.pool.default_avatar_owner.unwrap();
    let record = pool.lookup_by_id(FIRST_LOCAL_ID).await.unwrap();
    assert_eq!(record.owner_id, default_owner);

    let sample = pool.sample_unplayed(Category::Easy, 1).await.unwrap();
    assert_eq!(sample.len(), 1);
    assert_eq!(sample[0].id, FIRST_LOCAL_ID);
    assert_eq!(sample[0].owner_id, default_owner);

    pool.shutdown().await;
}
