#![allow(non_snake_case)]
use pixel_place::{
    board::RowVersion,
    error::LedgerError,
    ledger::{
        AccountInfo,
        Berry,
    },
    queue::{
        OfferOutcome,
        PendingEdit,
    },
    test_helpers::{
        ALICE_INDEX,
        FakeLedger,
        TestContext,
        test_config,
    },
};
use std::time::Duration;

const WHITE: u32 = 0xffffff;
const RED: u32 = 0xe50000;
const BLUE: u32 = 0x0000ea;
const GREEN: u32 = 0x02be01;

fn unavailable() -> LedgerError {
    LedgerError::Unavailable("node timed out".to_string())
}

#[tokio::test(start_paused = true)]
async fn offer__edits_below_batch_size_flush_together_after_debounce() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), test_config(2, 2, 5)).await;

    // when
    let first = ctx.engine.offer(0, 0, RED);
    let second = ctx.engine.offer(1, 1, BLUE);

    // then
    assert_eq!(first, OfferOutcome::Queued);
    assert_eq!(second, OfferOutcome::Queued);
    assert_eq!(ctx.engine.board().display_color(0, 0).unwrap(), RED);
    assert!(ctx.engine.in_flight().is_empty());
    assert!(ctx.ledger.submissions().is_empty());

    ctx.engine.step().await;
    assert_eq!(ctx.engine.in_flight().len(), 2);

    ctx.settle(20, |engine, _| {
        engine.board().cell(0, 0).unwrap().color == RED
            && engine.board().cell(1, 1).unwrap().color == BLUE
    })
    .await;
    assert_eq!(
        ctx.ledger.submissions(),
        vec![vec![
            PendingEdit::new(0, 0, RED),
            PendingEdit::new(1, 1, BLUE)
        ]]
    );
    assert_eq!(ctx.engine.board().overlay_len(), 0);
    assert_eq!(ctx.engine.board().cell(1, 1).unwrap().owner, ALICE_INDEX);
    assert_eq!(ctx.engine.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn offer__repeated_colors_are_not_queued() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), test_config(2, 2, 5)).await;

    // when
    let same_as_confirmed = ctx.engine.offer(0, 0, WHITE);
    let queued = ctx.engine.offer(0, 0, RED);
    let same_as_pending = ctx.engine.offer(0, 0, RED);
    let outside = ctx.engine.offer(2, 0, RED);

    // then
    assert_eq!(same_as_confirmed, OfferOutcome::Duplicate);
    assert_eq!(queued, OfferOutcome::Queued);
    assert_eq!(same_as_pending, OfferOutcome::Duplicate);
    assert_eq!(outside, OfferOutcome::OutOfBounds);
    assert_eq!(ctx.engine.queued(), 1);
}

#[tokio::test(start_paused = true)]
async fn offer__balance_covers_queued_and_in_flight_edits() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(3, 3, 2), test_config(3, 3, 5)).await;
    ctx.engine.offer(0, 0, RED);
    ctx.engine.offer(1, 0, RED);

    // when
    let over_budget = ctx.engine.offer(2, 0, RED);
    ctx.settle(10, |engine, _| engine.in_flight().len() == 2).await;
    let while_sending = ctx.engine.offer(2, 0, RED);

    // then
    assert_eq!(over_budget, OfferOutcome::InsufficientBalance);
    assert_eq!(while_sending, OfferOutcome::InsufficientBalance);
    assert_eq!(ctx.engine.in_flight().len(), 2);
    assert_eq!(ctx.engine.board().overlay_len(), 2);
    assert!(ctx.engine.status().contains("Not enough balance"));
}

#[tokio::test(start_paused = true)]
async fn submit__only_one_batch_is_ever_in_flight() {
    // given
    let ledger = FakeLedger::new(3, 3, 100).with_submit_latency(Duration::from_millis(300));
    let mut ctx = TestContext::new(ledger, test_config(3, 3, 2)).await;

    // when
    for x in 0..3 {
        ctx.engine.offer(x, 0, RED);
    }
    ctx.engine.offer(0, 1, RED);
    ctx.engine.offer(1, 1, RED);
    ctx.settle(50, |engine, ledger| {
        ledger.submissions().len() == 3 && engine.in_flight().is_empty()
    })
    .await;

    // then
    assert_eq!(ctx.ledger.max_submits_in_flight(), 1);
    let sizes: Vec<_> = ctx.ledger.submissions().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(ctx.engine.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn submit__newer_queued_edit_keeps_its_overlay_when_older_batch_lands() {
    // given
    let ledger = FakeLedger::new(2, 2, 10).with_submit_latency(Duration::from_millis(300));
    let mut ctx = TestContext::new(ledger, test_config(2, 2, 1)).await;
    ctx.engine.offer(0, 0, RED);
    assert_eq!(ctx.engine.in_flight().len(), 1);

    // when
    let repaint = ctx.engine.offer(0, 0, BLUE);
    ctx.engine.step().await;

    // then
    assert_eq!(repaint, OfferOutcome::Queued);
    assert_eq!(ctx.engine.board().overlay_color(0, 0), Some(BLUE));
    ctx.settle(30, |engine, _| {
        engine.board().cell(0, 0).unwrap().color == BLUE && engine.board().overlay_len() == 0
    })
    .await;
    assert_eq!(
        ctx.ledger.submissions(),
        vec![
            vec![PendingEdit::new(0, 0, RED)],
            vec![PendingEdit::new(0, 0, BLUE)]
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn submit__gives_up_after_max_consecutive_failures() {
    // given
    let ledger = FakeLedger::new(2, 2, 10);
    ledger.script_submit_results([Err(unavailable()), Err(unavailable()), Err(unavailable())]);
    let mut ctx = TestContext::new(ledger, test_config(2, 2, 5)).await;

    // when
    ctx.engine.offer(0, 0, RED);
    ctx.settle(50, |engine, _| engine.errors().len() == 3).await;
    ctx.run_for(Duration::from_secs(5)).await;

    // then
    let submissions = ctx.ledger.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(
        submissions
            .iter()
            .all(|batch| batch == &vec![PendingEdit::new(0, 0, RED)])
    );
    assert_eq!(ctx.engine.queued(), 0);
    assert!(ctx.engine.in_flight().is_empty());
    assert_eq!(ctx.engine.board().overlay_len(), 0);
    assert_eq!(ctx.engine.board().display_color(0, 0).unwrap(), WHITE);
    assert!(ctx.engine.errors()[2].contains("dropped 1"));
}

#[tokio::test(start_paused = true)]
async fn submit__retries_until_success_below_the_failure_limit() {
    // given
    let ledger = FakeLedger::new(2, 2, 10);
    ledger.script_submit_results([Err(unavailable()), Err(unavailable())]);
    let mut ctx = TestContext::new(ledger, test_config(2, 2, 5)).await;

    // when
    ctx.engine.offer(1, 0, GREEN);
    ctx.settle(50, |engine, _| {
        engine.board().cell(1, 0).unwrap().color == GREEN
    })
    .await;

    // then
    assert_eq!(ctx.ledger.submissions().len(), 3);
    assert_eq!(ctx.engine.errors().len(), 2);
    assert_eq!(ctx.engine.board().overlay_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn refresh__undecodable_row_leaves_board_untouched() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), test_config(2, 2, 5)).await;
    ctx.ledger.paint(0, 0, GREEN, 7);
    ctx.ledger.paint(0, 1, GREEN, 7);
    ctx.ledger.corrupt_row(1);

    // when
    ctx.settle(10, |engine, _| !engine.errors().is_empty()).await;

    // then
    assert_eq!(ctx.engine.board().cell(0, 0).unwrap().color, WHITE);
    assert_eq!(ctx.engine.board().row_version(0), Some(RowVersion(0)));
    assert_eq!(ctx.engine.board().row_version(1), Some(RowVersion(0)));
    assert!(ctx.engine.errors()[0].contains("board refresh failed"));

    ctx.ledger.heal_row(1);
    ctx.settle(10, |engine, _| {
        engine.board().cell(0, 1).unwrap().color == GREEN
    })
    .await;
    assert_eq!(ctx.engine.board().cell(0, 0).unwrap().color, GREEN);
}

#[tokio::test(start_paused = true)]
async fn refresh__fetches_only_changed_rows_in_chunks() {
    // given
    let mut config = test_config(1, 25, 5);
    config.rows_per_fetch = 10;
    let mut ctx = TestContext::new(FakeLedger::new(1, 25, 10), config).await;
    let bootstrap_requests = ctx.ledger.row_requests();

    // when
    ctx.ledger.paint(0, 3, RED, 7);
    ctx.ledger.paint(0, 17, BLUE, 7);
    ctx.settle(10, |engine, _| {
        engine.board().cell(0, 17).unwrap().color == BLUE
    })
    .await;

    // then
    assert_eq!(
        bootstrap_requests,
        vec![
            (0..10).collect::<Vec<_>>(),
            (10..20).collect(),
            (20..25).collect()
        ]
    );
    assert_eq!(ctx.ledger.row_requests()[3..], [vec![3, 17]]);
    assert_eq!(ctx.engine.board().cell(0, 3).unwrap().color, RED);
}

#[tokio::test(start_paused = true)]
async fn poll__hidden_client_skips_ticks_but_not_forced_refreshes() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), test_config(2, 2, 5)).await;
    ctx.engine.set_visible(false);
    let reads_before = ctx.ledger.version_reads();

    // when
    ctx.run_for(Duration::from_millis(3_500)).await;

    // then
    assert_eq!(ctx.ledger.version_reads(), reads_before);
    assert!(ctx.engine.is_polling());

    ctx.engine.offer(1, 1, RED);
    ctx.settle(20, |engine, _| {
        engine.board().cell(1, 1).unwrap().color == RED
    })
    .await;
    assert!(ctx.ledger.version_reads() > reads_before);
}

#[tokio::test(start_paused = true)]
async fn poll__stops_when_idle_and_resumes_on_edit() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), test_config(2, 2, 5)).await;

    // when
    ctx.run_for(Duration::from_secs(11)).await;
    let reads_when_stopped = ctx.ledger.version_reads();
    ctx.run_for(Duration::from_secs(5)).await;

    // then
    assert!(!ctx.engine.is_polling());
    assert_eq!(ctx.ledger.version_reads(), reads_when_stopped);

    ctx.ledger.paint(1, 1, GREEN, 7);
    ctx.engine.offer(0, 0, RED);
    assert!(ctx.engine.is_polling());
    ctx.settle(20, |engine, _| {
        engine.board().cell(1, 1).unwrap().color == GREEN
            && engine.board().cell(0, 0).unwrap().color == RED
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn leaderboard__failed_owner_lookups_are_skipped() {
    // given
    let ledger = FakeLedger::new(3, 1, 10);
    ledger.paint(0, 0, RED, 7);
    ledger.paint(1, 0, RED, 8);
    ledger.paint(2, 0, RED, 8);
    ledger.set_owner(7, Err(unavailable()));
    ledger.set_owner(
        8,
        Ok(Some(AccountInfo {
            account_id: "bob.sim".to_string(),
            account_index: 8,
            avocado_balance: 0,
            banana_balance: 0,
            num_pixels: 2,
            farming_preference: Berry::Banana,
        })),
    );

    // when
    let mut ctx = TestContext::new(ledger, test_config(3, 1, 5)).await;
    ctx.settle(10, |engine, _| {
        engine
            .leaderboard()
            .iter()
            .any(|entry| entry.account_id.is_some())
    })
    .await;

    // then
    let entries = ctx.engine.leaderboard();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].owner, 8);
    assert_eq!(entries[0].pixels, 2);
    assert_eq!(entries[0].account_id.as_deref(), Some("bob.sim"));
    assert_eq!(entries[1].owner, 7);
    assert_eq!(entries[1].account_id, None);
    assert!(ctx.engine.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn account__balance_refreshes_after_confirmed_batch() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), test_config(2, 2, 5)).await;
    assert_eq!(ctx.engine.account().unwrap().avocado_balance, 10_000);

    // when
    ctx.engine.offer(0, 0, RED);
    ctx.engine.offer(1, 0, RED);
    ctx.settle(20, |engine, _| {
        engine.account().map(|a| a.num_pixels) == Some(2)
    })
    .await;

    // then
    assert_eq!(ctx.engine.account().unwrap().avocado_balance, 8_000);
    let shown = ctx.engine.displayed_balance(chrono::Utc::now()).unwrap();
    assert!((8.0..8.01).contains(&shown), "shown balance {shown}");
}

#[tokio::test(start_paused = true)]
async fn account__rejected_offer_rereads_balance_credited_since() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 1, 1), test_config(2, 1, 1)).await;
    ctx.engine.offer(0, 0, RED);
    ctx.settle(20, |engine, _| {
        engine.account().map(|a| a.avocado_balance) == Some(0)
    })
    .await;
    let broke = ctx.engine.offer(1, 0, BLUE);

    // when
    ctx.ledger.grant(2);
    ctx.settle(20, |engine, _| {
        engine.account().map(|a| a.avocado_balance) == Some(2_000)
    })
    .await;
    let credited = ctx.engine.offer(1, 0, BLUE);

    // then
    assert_eq!(broke, OfferOutcome::InsufficientBalance);
    assert_eq!(credited, OfferOutcome::Queued);
    ctx.settle(20, |engine, _| {
        engine.board().cell(1, 0).unwrap().color == BLUE
    })
    .await;
    assert_eq!(ctx.ledger.submissions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn poll__rereads_account_so_an_empty_balance_recovers() {
    // given
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 0), test_config(2, 2, 5)).await;
    assert_eq!(ctx.engine.offer(0, 0, RED), OfferOutcome::InsufficientBalance);
    ctx.run_for(Duration::from_millis(100)).await;
    let reads_before = ctx.ledger.account_reads();

    // when
    ctx.ledger.grant(3);
    ctx.run_for(Duration::from_millis(1_500)).await;

    // then
    assert!(ctx.ledger.account_reads() > reads_before);
    assert_eq!(ctx.engine.account().unwrap().avocado_balance, 3_000);
    assert_eq!(ctx.engine.offer(0, 0, RED), OfferOutcome::Queued);
}

#[tokio::test(start_paused = true)]
async fn offer__confirmed_edits_count_against_balance_until_account_is_reread() {
    // given
    let ledger = FakeLedger::new(4, 1, 3).with_account_latency(Duration::from_secs(1));
    let mut ctx = TestContext::new(ledger, test_config(4, 1, 2)).await;
    ctx.engine.offer(0, 0, RED);
    ctx.engine.offer(1, 0, RED);
    ctx.settle(5, |engine, ledger| {
        ledger.submissions().len() == 1 && engine.in_flight().is_empty()
    })
    .await;
    assert_eq!(ctx.engine.account().unwrap().avocado_balance, 3_000);

    // when
    let affordable = ctx.engine.offer(2, 0, RED);
    let over_budget = ctx.engine.offer(3, 0, RED);

    // then
    assert_eq!(affordable, OfferOutcome::Queued);
    assert_eq!(over_budget, OfferOutcome::InsufficientBalance);
    ctx.settle(20, |engine, ledger| {
        ledger.submissions().len() == 2 && engine.in_flight().is_empty()
    })
    .await;
    ctx.run_for(Duration::from_secs(3)).await;
    assert_eq!(ctx.ledger.account_info().avocado_balance, 0);
    assert_eq!(ctx.engine.account().unwrap().avocado_balance, 0);
    assert_eq!(ctx.engine.account().unwrap().num_pixels, 3);
    assert_eq!(ctx.engine.offer(3, 0, RED), OfferOutcome::InsufficientBalance);
    assert!(ctx.engine.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn farming__switching_berry_moves_accrual_to_it() {
    // given
    let mut config = test_config(2, 2, 5);
    config.daily_reward_per_pixel = 86_400_000;
    let mut ctx = TestContext::new(FakeLedger::new(2, 2, 10), config).await;
    let before = ctx.engine.balance_estimate().unwrap();
    assert!(before.avocado.rate_per_ms() > 0.0);
    assert_eq!(before.banana.rate_per_ms(), 0.0);

    // when
    ctx.engine.select_farming_preference(Berry::Banana);
    ctx.settle(10, |engine, _| engine.farming_preference() == Berry::Banana)
        .await;

    // then
    let after = ctx.engine.balance_estimate().unwrap();
    assert_eq!(after.avocado.rate_per_ms(), 0.0);
    assert!(after.banana.rate_per_ms() > 0.0);
    assert_eq!(ctx.ledger.account_info().farming_preference, Berry::Banana);
    assert_eq!(ctx.engine.status(), "Farming banana");
}
