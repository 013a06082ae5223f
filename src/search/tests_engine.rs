use super::*;
use crate::error::ErrorCode;
use crate::gecko::GeckoClient;
use crate::sim::SimTarget;
use crate::transport::Transport;

const BASE: u32 = 0x1000_0000;

fn setup() -> (GeckoClient, SimTarget) {
    let sim = SimTarget::new();
    let mut client = GeckoClient::new(Box::new(sim.clone()));
    client.connect().unwrap();
    (client, sim)
}

fn request(end: u32, comparisons: Vec<SearchComparisonInfo>) -> SearchRequest {
    SearchRequest {
        start: BASE,
        end,
        size: SearchSize::Word,
        comparisons,
    }
}

fn equal(value: u32) -> Vec<SearchComparisonInfo> {
    vec![SearchComparisonInfo::exact(ComparisonType::Equal, value)]
}

fn ignore(_: &SearchProgress) {}

fn session(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("geckolink_engine_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn test_exact_search_is_idempotent() {
    let (mut client, sim) = setup();
    sim.write_u32(BASE + 0x10, 42);
    sim.write_u32(BASE + 0x80, 42);
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x100, equal(42));

    let outcome = engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(outcome, SearchOutcome::Filtered { count: 2 });
    let first = engine.results().to_vec();
    assert_eq!(first, vec![BASE + 0x10, BASE + 0x80]);

    engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(engine.results(), &first[..]);
    assert_eq!(engine.generation(), Some(1));
}

#[test]
fn test_undo_is_one_level() {
    let (mut client, sim) = setup();
    for offset in [0, 4, 8] {
        sim.write_u32(BASE + offset, 5);
    }
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x10, equal(5));

    engine.search(&mut client, &req, &mut ignore).unwrap();
    sim.write_u32(BASE, 6);
    engine.search(&mut client, &req, &mut ignore).unwrap();
    assert!(!engine.can_undo());
    assert!(!engine.undo());

    sim.write_u32(BASE + 4, 7);
    engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(engine.results(), &[BASE + 8]);

    assert!(engine.undo());
    assert_eq!(engine.results(), &[BASE + 4, BASE + 8]);
    assert_eq!(engine.generation(), Some(1));
    assert_eq!(engine.state(), SearchState::Refining);
    assert!(!engine.undo());
}

#[test]
fn test_unknown_initial_value_defers_filtering() {
    let (mut client, sim) = setup();
    sim.write_u32(BASE + 0x20, 1);
    let mut engine = SearchEngine::new();
    let increased = vec![SearchComparisonInfo::new(
        ComparisonType::Greater,
        0,
        ReferenceKind::Unknown,
    )];
    let req = request(BASE + 0x40, increased);

    assert_eq!(
        engine.search(&mut client, &req, &mut ignore).unwrap(),
        SearchOutcome::Pending
    );
    assert_eq!(engine.state(), SearchState::PendingUnknown);
    assert!(engine.results().is_empty());

    sim.write_u32(BASE + 0x20, 3);
    let outcome = engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(outcome, SearchOutcome::Filtered { count: 1 });
    assert_eq!(engine.results(), &[BASE + 0x20]);
    assert_eq!(engine.previous_snapshot().unwrap().read_u32(BASE + 0x20), 1);
}

#[test]
fn test_cancelled_pass_changes_nothing() {
    let (mut client, sim) = setup();
    sim.write_u32(BASE, 5);
    sim.write_u32(BASE + 0xF000, 5);
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x1_0000, equal(5));
    engine.search(&mut client, &req, &mut ignore).unwrap();

    let token = client.cancel_token();
    let outcome = engine
        .search(&mut client, &req, &mut |p: &SearchProgress| {
            if p.transfer.ok {
                token.cancel();
            }
        })
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Cancelled);
    assert_eq!(engine.generation(), Some(0));
    assert!(engine.previous_snapshot().is_none());
    assert_eq!(engine.results(), &[BASE, BASE + 0xF000]);

    sim.write_u32(BASE, 6);
    engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(engine.results(), &[BASE + 0xF000]);
    assert_eq!(engine.generation(), Some(1));
}

#[test]
fn test_cancel_stops_sparse_pass_between_blocks() {
    let (mut client, sim) = setup();
    let far = [BASE, BASE + 0x10_0000, BASE + 0x1F_0000];
    for address in far {
        sim.write_u32(address, 3);
    }
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x20_0000, equal(3));
    engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(engine.results(), &far);
    assert_eq!(crate::search::engine::candidate_blocks(&far, 4).len(), 3);

    // each block fits in one chunk, so the flag is only seen between blocks
    let before = sim.chunks_sent();
    let token = client.cancel_token();
    let outcome = engine
        .search(&mut client, &req, &mut |p: &SearchProgress| {
            if p.transfer.ok {
                token.cancel();
            }
        })
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Cancelled);
    assert_eq!(sim.chunks_sent() - before, 1);
    assert_eq!(engine.generation(), Some(0));
    assert_eq!(engine.results(), &far);

    // the next pass starts with the request cleared
    let outcome = engine.search(&mut client, &req, &mut ignore).unwrap();
    assert_eq!(outcome, SearchOutcome::Filtered { count: 3 });
    assert_eq!(engine.generation(), Some(1));
}

#[test]
fn test_failed_pass_changes_nothing() {
    let (mut client, sim) = setup();
    sim.write_u32(BASE + 4, 9);
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x10, equal(9));
    engine.search(&mut client, &req, &mut ignore).unwrap();

    let mut link = sim.clone();
    link.disconnect();
    match engine.search(&mut client, &req, &mut ignore) {
        Err(SearchError::Gecko(e)) => assert_eq!(e.code(), ErrorCode::CommandSendError),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(engine.state(), SearchState::Refining);
    assert_eq!(engine.results(), &[BASE + 4]);
    assert_eq!(engine.generation(), Some(0));
}

#[test]
fn test_refine_dumps_only_candidate_blocks() {
    let (mut client, sim) = setup();
    sim.write_u32(BASE, 3);
    sim.write_u32(BASE + 0x10_0000, 3);
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x20_0000, equal(3));
    engine.search(&mut client, &req, &mut ignore).unwrap();
    let chunks_before = sim.chunks_sent();

    let mut reports = Vec::new();
    engine
        .search(&mut client, &req, &mut |p: &SearchProgress| reports.push(p.block))
        .unwrap();
    assert_eq!(sim.chunks_sent() - chunks_before, 2);
    assert!(reports.iter().all(|b| b.block_count == 2 && b.total_block_size == 8));
    let last = reports.last().unwrap();
    assert_eq!(last.block_id, 1);
    assert_eq!(last.block_start, BASE + 0x10_0000);
    assert_eq!(last.blocks_dumped_size, 8);
    assert_eq!(engine.results().len(), 2);
}

#[test]
fn test_exhausted_search_stops_talking_to_target() {
    let (mut client, sim) = setup();
    let mut engine = SearchEngine::new();
    let req = request(BASE + 0x10, equal(99));
    assert_eq!(
        engine.search(&mut client, &req, &mut ignore).unwrap(),
        SearchOutcome::Exhausted { can_undo: false }
    );
    let commands = sim.commands().len();
    assert_eq!(
        engine.search(&mut client, &req, &mut ignore).unwrap(),
        SearchOutcome::Exhausted { can_undo: false }
    );
    assert_eq!(sim.commands().len(), commands);

    engine.reset();
    assert_eq!(engine.state(), SearchState::Empty);
    assert!(engine.snapshot().is_none());
}

#[test]
fn test_rejects_unmapped_range_and_size_change() {
    let (mut client, _sim) = setup();
    let mut engine = SearchEngine::new();
    let bad = SearchRequest {
        start: 0x0000_1000,
        end: 0x0000_2000,
        size: SearchSize::Word,
        comparisons: equal(1),
    };
    assert!(matches!(
        engine.search(&mut client, &bad, &mut ignore),
        Err(SearchError::InvalidRequest(_))
    ));

    let mut req = request(BASE + 0x10, equal(0));
    engine.search(&mut client, &req, &mut ignore).unwrap();
    req.size = SearchSize::Byte;
    assert!(matches!(
        engine.search(&mut client, &req, &mut ignore),
        Err(SearchError::InvalidRequest(_))
    ));
    req.comparisons.clear();
    assert!(engine.search(&mut client, &req, &mut ignore).is_err());
}

#[test]
fn test_generations_are_archived() {
    let (mut client, sim) = setup();
    sim.write_u32(BASE + 8, 0x1234);
    let history = History::open(session("archive")).unwrap();
    let mut engine = SearchEngine::new().with_history(history);
    let req = request(BASE + 0x20, equal(0x1234));

    engine.search(&mut client, &req, &mut ignore).unwrap();
    engine.search(&mut client, &req, &mut ignore).unwrap();

    let generation = engine.load_generation(1).unwrap();
    assert_eq!(generation.results, vec![BASE + 8]);
    assert_eq!(generation.snapshot.read_u32(BASE + 8), 0x1234);
    assert_eq!(generation.snapshot.start(), BASE);
    assert!(matches!(
        SearchEngine::new().load_generation(0),
        Err(SearchError::NoHistory)
    ));
}

#[test]
fn test_pages_and_sorting() {
    let (mut client, sim) = setup();
    for i in 0..300u32 {
        sim.write_u32(BASE + i * 4, 300 - i);
    }
    let mut engine = SearchEngine::new();
    let between = vec![
        SearchComparisonInfo::exact(ComparisonType::Greater, 0),
        SearchComparisonInfo::exact(ComparisonType::LowerEqual, 300),
    ];
    engine
        .search(&mut client, &request(BASE + 0x800, between), &mut ignore)
        .unwrap();
    assert_eq!(engine.results().len(), 300);
    assert_eq!(engine.page_count(), 2);
    assert_eq!(engine.page(1, Radix::Decimal).len(), 44);
    assert_eq!(engine.page(0, Radix::Decimal)[0].new, "300");

    engine.sort_by(SortColumn::New);
    assert_eq!(engine.results()[0], BASE + 299 * 4);
    engine.sort_by(SortColumn::New);
    assert_eq!(engine.results()[0], BASE);
    assert!(engine.sort_state().descending);
}
