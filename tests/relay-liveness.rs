//! Drives a relay block by block against simulated bakers, checking that a
//! bundle reaches a terminal state within its branch's lifetime.

use common::Simulation;
use flashbake_relay::test_utils::FakeCodec;

mod common;

const TTL: u64 = 60;

#[tokio::test]
async fn lazy_baker_is_retried_until_a_later_baker_includes() {
    let mut sim = Simulation::new(TTL, 100, &[(103, "tz1lazy"), (105, "tz1good")]).await;
    sim.bakers.set_lazy("tz1lazy");

    let raw = FakeCodec::raw("B100", "swap");
    let hash = sim.relay.inject(raw).await.unwrap();
    assert_eq!(hash, FakeCodec::hash_of("B100|swap"));

    sim.step().await; // 101
    assert_eq!(sim.bakers.received("tz1lazy"), 0);
    sim.step().await; // 102, targets 103
    assert_eq!(sim.bakers.received("tz1lazy"), 1);

    sim.step().await; // 103, baked without the bundle
    assert!(sim.relay.is_pending(&hash));
    sim.step().await; // 104, targets 105
    assert_eq!(sim.bakers.received("tz1good"), 1);

    sim.step().await; // 105
    let metrics = sim.relay.metrics();
    assert_eq!(sim.relay.pending_count(), 0);
    assert_eq!(metrics.successful.get(), 1);
    assert_eq!(metrics.resends.get(), 1);
    assert_eq!(metrics.successful_bakers.get(), 1);
    assert_eq!(metrics.expired.get(), 0);
}

#[tokio::test]
async fn bundle_without_any_taker_expires_with_its_branch() {
    let mut sim = Simulation::new(TTL, 100, &[]).await;
    let hash = sim.relay.inject(FakeCodec::raw("B100", "swap")).await.unwrap();

    while sim.chain.tip() < Some(100 + TTL - 1) {
        sim.step().await;
    }
    assert!(sim.relay.is_pending(&hash));

    sim.step().await;
    let metrics = sim.relay.metrics();
    assert!(!sim.relay.is_pending(&hash));
    assert_eq!(metrics.expired.get(), 1);
    assert_eq!(metrics.successful.get(), 0);
    assert_eq!(metrics.pending.get(), 0);
}

#[tokio::test]
async fn inclusion_through_the_mempool_still_confirms() {
    let mut sim = Simulation::new(TTL, 100, &[(110, "tz1good")]).await;
    let hash = sim.relay.inject(FakeCodec::raw("B100", "swap")).await.unwrap();

    // Some other route got it into block 102.
    sim.chain.include(102, hash.clone());
    sim.step().await;
    sim.step().await;

    assert!(!sim.relay.is_pending(&hash));
    assert_eq!(sim.relay.metrics().successful.get(), 1);
    assert_eq!(sim.bakers.received("tz1good"), 0);
}
