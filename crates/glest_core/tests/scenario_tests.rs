//! End-to-end scenarios driven through the public simulation API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use glest_core::events::{EntityKind, ProductionFailure};
use glest_core::prelude::*;
use glest_test_utils::determinism::{replay, CommandLog};
use glest_test_utils::fixtures::{
    cell_pos, cost, open_config, order, run_ticks, run_until, simulation, spawn_building,
    spawn_unit,
};

fn gold(sim: &Simulation, player: PlayerId) -> u32 {
    sim.world().resources(player).get("gold").copied().unwrap_or(0)
}

// =============================================================================
// 1. Single unit moves to a point
// =============================================================================

#[test]
fn test_single_unit_moves_to_point() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (10, 10));
    sim.issue(&order(1, scout, Command::Move { target: cell_pos(20, 10) }))
        .unwrap();

    // One cell per tick: ⌈10 / 1⌉ ticks.
    let events = run_ticks(&mut sim, 9);
    let unit = sim.world().unit(scout).unwrap();
    assert!(unit.position.x < Fixed::from_num(20));
    assert!(matches!(unit.state, UnitState::Moving { .. }));

    let mut all = events;
    all.extend(sim.tick());
    let unit = sim.world().unit(scout).unwrap();
    assert_eq!(unit.position, cell_pos(20, 10));
    assert_eq!(unit.state, UnitState::Idle);
    assert!(unit.commands.is_empty());
    assert!(all.iter().all(|e| !matches!(
        e,
        GameEvent::CommandFailed { .. } | GameEvent::CommandRejected { .. }
    )));
}

#[test]
fn test_fast_unit_does_not_overshoot() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (10, 10));
    let target = Vec2Fixed::new(Fixed::from_num(10.5), Fixed::from_num(10));
    sim.issue(&order(1, scout, Command::Move { target })).unwrap();

    sim.tick();
    let unit = sim.world().unit(scout).unwrap();
    assert_eq!(unit.position, target);
    assert_eq!(unit.state, UnitState::Idle);
}

#[test]
fn test_move_into_last_cell_keeps_fraction() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (25, 10));
    let target = Vec2Fixed::new(Fixed::from_num(31.5), Fixed::from_num(10.5));
    sim.issue(&order(1, scout, Command::Move { target })).unwrap();

    run_ticks(&mut sim, 20);
    let unit = sim.world().unit(scout).unwrap();
    assert_eq!(unit.position, target);
    assert_eq!(unit.state, UnitState::Idle);
    assert!(unit.commands.is_empty());
}

#[test]
fn test_mover_steps_around_standing_unit() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (5, 5));
    let blocker = spawn_unit(&mut sim, 1, "worker", (7, 5));
    sim.issue(&order(1, scout, Command::Move { target: cell_pos(10, 5) }))
        .unwrap();

    let events = run_ticks(&mut sim, 30);
    assert!(!events.iter().any(|e| matches!(e, GameEvent::CommandFailed { .. })));
    let unit = sim.world().unit(scout).unwrap();
    assert_eq!(unit.position, cell_pos(10, 5));
    assert!(unit.commands.is_empty());
    assert_eq!(sim.world().unit(blocker).unwrap().position, cell_pos(7, 5));
}

#[test]
fn test_placed_buildings_announce_themselves() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "tech")]));
    let start = sim.world().entities().buildings().next().map(|b| b.id).unwrap();
    let tower = spawn_building(&mut sim, 1, "mage_tower", (26, 26));

    let events = sim.tick();
    let created: Vec<EntityId> = events
        .iter()
        .filter_map(|e| match e {
            GameEvent::BuildingCreated { building, player: 1, building_type }
                if building_type == "mage_tower" =>
            {
                Some(*building)
            }
            _ => None,
        })
        .collect();
    assert_eq!(created, vec![start, tower]);
}

// =============================================================================
// 2. Production with cancel refund
// =============================================================================

#[test]
fn test_production_cancel_refunds_exactly() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    let before = sim.world().resources(1);
    assert_eq!(before, cost(&[("gold", 100), ("wood", 50)]));

    let initiate = order(1, tower, Command::ProduceUnit { unit_type: "initiate".into() });
    assert_eq!(sim.issue(&initiate), Err(CommandError::InsufficientResources));
    assert_eq!(sim.world().resources(1), before);

    let worker = order(1, tower, Command::ProduceUnit { unit_type: "worker".into() });
    sim.issue(&worker).unwrap();
    assert_eq!(gold(&sim, 1), 25);

    sim.issue(&order(1, tower, Command::CancelProduction { index: Some(0) }))
        .unwrap();
    assert_eq!(gold(&sim, 1), 100);
    assert_eq!(sim.world().resources(1).get("wood").copied(), Some(50));
    assert!(sim.world().building(tower).unwrap().production.is_empty());

    let events = sim.tick();
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::ProductionCancelled { name, .. } if name == "worker")));
}

#[test]
fn test_cancel_in_progress_item_refunds_exactly() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "worker".into() }))
        .unwrap();
    run_ticks(&mut sim, 20);
    assert!(sim.world().building(tower).unwrap().production.current().is_some());

    sim.issue(&order(1, tower, Command::CancelProduction { index: None }))
        .unwrap();
    assert_eq!(gold(&sim, 1), 100);
    run_ticks(&mut sim, 100);
    assert_eq!(sim.world().entities().unit_count(), 0);
}

#[test]
fn test_cancel_without_index_takes_newest_item() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    let worker = order(1, tower, Command::ProduceUnit { unit_type: "worker".into() });
    sim.issue(&worker).unwrap();

    // Nothing has started yet.
    sim.issue(&order(1, tower, Command::CancelProduction { index: None }))
        .unwrap();
    assert_eq!(gold(&sim, 1), 100);
    assert!(sim.world().building(tower).unwrap().production.is_empty());
    assert_eq!(
        sim.issue(&order(1, tower, Command::CancelProduction { index: None })),
        Err(CommandError::InvalidTarget)
    );
}

// =============================================================================
// 3. Conservation under failure
// =============================================================================

#[test]
fn test_blocked_spawn_fails_and_refunds() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic"), (2, "magic")]));
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    for y in 3..=6 {
        for x in 3..=6 {
            if x == 3 || x == 6 || y == 3 || y == 6 {
                spawn_unit(&mut sim, 2, "scout", (x, y));
            }
        }
    }
    let before = sim.world().resources(1);

    sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "worker".into() }))
        .unwrap();
    assert_eq!(gold(&sim, 1), 25);
    let events = run_ticks(&mut sim, 90);

    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::ProductionFailed { reason: ProductionFailure::NoSpace, .. }
    )));
    assert!(!events.iter().any(|e| matches!(e, GameEvent::ProductionComplete { .. })));
    assert_eq!(sim.world().resources(1), before);
    assert!(sim.world().entities().query_by_player(1).iter().all(|&id| id == tower));
}

// =============================================================================
// 4. Combat with damage multipliers
// =============================================================================

#[test]
fn test_piercing_against_leather_kills_in_twelve_hits() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic"), (2, "magic")]));
    let archer = spawn_unit(&mut sim, 1, "archer", (10, 10));
    let swordman = spawn_unit(&mut sim, 2, "swordman", (13, 10));
    sim.issue(&order(1, archer, Command::Attack { target: swordman }))
        .unwrap();

    let mut hits = Vec::new();
    let mut dying_at = None;
    let mut died_at = None;
    for _ in 0..800 {
        let tick = sim.get_tick();
        for event in sim.tick() {
            match event {
                GameEvent::UnitAttacked { target, damage, remaining_health, .. }
                    if target == swordman =>
                {
                    hits.push((damage, remaining_health));
                }
                GameEvent::UnitDying { entity, kind: EntityKind::Unit, .. } if entity == swordman => {
                    dying_at = Some(tick);
                }
                GameEvent::UnitDied { entity, kind: EntityKind::Unit, .. } if entity == swordman => {
                    died_at = Some(tick);
                }
                _ => {}
            }
        }
        if died_at.is_some() {
            break;
        }
    }

    assert_eq!(hits.len(), 12, "⌈150 / 13⌉ hits");
    assert!(hits.iter().all(|&(damage, _)| damage == 13));
    assert_eq!(hits.last().map(|&(_, hp)| hp), Some(0));
    let dying_at = dying_at.expect("target went through Dying");
    assert_eq!(died_at, Some(dying_at + 1));
    assert!(sim.world().unit(swordman).is_none());
    assert!(sim.world().unit(archer).unwrap().commands.is_empty());
}

#[test]
fn test_dying_unit_is_visible_for_one_tick() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    sim.world_mut().destroy(worker).unwrap();
    assert_eq!(sim.world().unit(worker).unwrap().state, UnitState::Dying);
    assert_eq!(sim.world().unit(worker).unwrap().health.current, 0);

    let events = sim.tick();
    assert!(events.iter().any(|e| matches!(e, GameEvent::UnitDied { entity, .. } if *entity == worker)));
    assert!(sim.world().unit(worker).is_none());
    assert!(sim.view().units.get(&worker).is_none());
}

// =============================================================================
// 5. Deterministic replay
// =============================================================================

fn battlefield() -> Simulation {
    let mut config = open_config(40, 40, &[(1, "tech"), (2, "tech")]);
    config.map.resources = vec![
        glest_core::map::ResourcePlacement {
            resource: "gold".into(),
            cell: (16, 10),
            amount: 200,
        },
        glest_core::map::ResourcePlacement {
            resource: "wood".into(),
            cell: (10, 18),
            amount: 200,
        },
    ];
    simulation(&config)
}

fn recorded_session() -> CommandLog {
    let sim = battlefield();
    let ids = |player: PlayerId, unit_type: &str| -> Vec<EntityId> {
        sim.world()
            .entities()
            .units()
            .filter(|u| u.player == player && u.unit_type == unit_type)
            .map(|u| u.id)
            .collect()
    };
    let tower = |player: PlayerId| -> EntityId {
        sim.world()
            .entities()
            .buildings()
            .find(|b| b.player == player)
            .map(|b| b.id)
            .unwrap()
    };
    let gold_node = sim.world().nodes().keys().next().copied().unwrap();
    let enemy_archer = ids(2, "archer")[0];

    let mut log = CommandLog::new();
    let workers = ids(1, "worker");
    log.record(0, CommandSubmission::new(1, workers[0], Command::Gather { node: gold_node }));
    log.record(
        0,
        CommandSubmission::new(
            1,
            workers[1],
            Command::Build {
                building_type: "energy_source".into(),
                cell: (18, 18),
            },
        ),
    );
    log.record(5, CommandSubmission::new(1, tower(1), Command::ProduceUnit { unit_type: "archer".into() }));
    log.record(5, CommandSubmission::new(2, tower(2), Command::StartResearch { tech: "improved_bows".into() }));
    log.record(
        40,
        CommandSubmission::group(
            2,
            ids(2, "worker"),
            Command::Formation {
                anchor: cell_pos(25, 25),
                shape: FormationShape::Line,
                offset: Vec2Fixed::ZERO,
            },
        ),
    );
    log.record(120, CommandSubmission::new(1, ids(1, "archer")[0], Command::Attack { target: enemy_archer }));
    log.record(300, CommandSubmission::new(1, tower(1), Command::CancelProduction { index: None }));
    log.record(450, CommandSubmission::new(2, enemy_archer, Command::Patrol { target: cell_pos(5, 30) }));
    log.record(600, CommandSubmission::new(1, workers[1], Command::Stop).queued());
    log
}

#[test]
fn test_replay_matches_bit_exactly() {
    let log = recorded_session();
    let first = replay(battlefield, &log, 1000);
    let second = replay(battlefield, &log, 1000);
    assert_eq!(first.len(), 1000);
    for (tick, (a, b)) in first.iter().zip(&second).enumerate() {
        assert_eq!(a, b, "snapshots diverged at tick {tick}");
    }
}

#[test]
fn test_replay_from_saved_log() {
    let log = recorded_session();
    let text = log.to_ron().unwrap();
    let loaded = CommandLog::from_ron(&text).unwrap();
    assert_eq!(replay(battlefield, &log, 200), replay(battlefield, &loaded, 200));
}

// =============================================================================
// 6. Read-view isolation
// =============================================================================

#[test]
fn test_handlers_read_pre_tick_view() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (10, 10));
    sim.issue(&order(1, scout, Command::Move { target: cell_pos(20, 10) }))
        .unwrap();

    let view = sim.shared_view();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    sim.subscribe(
        EventKind::CommandRejected,
        Box::new(move |_| {
            let snapshot = view.load();
            let x = snapshot.get_units_for_player(1)[0].position.x;
            sink.lock().unwrap().push((snapshot.tick, x));
        }),
    );

    run_ticks(&mut sim, 3);
    sim.submit(order(1, scout, Command::Gather { node: 999 }));
    sim.tick();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (tick, x) = seen[0];
    assert_eq!(tick, 3, "reader saw the committed tick, not the one in progress");
    assert_eq!(x.round(), Fixed::from_num(13));
    assert!(x < sim.view().units[&scout].position.x);
    assert_eq!(sim.view().tick, 4);
}

#[test]
fn test_concurrent_reader_never_sees_torn_state() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (10, 10));
    let worker = spawn_unit(&mut sim, 1, "worker", (10, 12));
    sim.issue(&order(1, scout, Command::Move { target: cell_pos(20, 10) }))
        .unwrap();
    sim.issue(&order(1, worker, Command::Move { target: cell_pos(10, 20) }))
        .unwrap();

    let view = sim.shared_view();
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = Arc::clone(&stop);
    let reader = thread::spawn(move || {
        let mut observed = 0u32;
        while !reader_stop.load(Ordering::Relaxed) {
            let snapshot = view.load();
            let units = snapshot.get_units_for_player(1);
            assert_eq!(units.len(), 2);
            let expected = (10 + snapshot.tick).min(20);
            let x = snapshot.units[&scout].position.x.round().to_num::<u64>();
            assert_eq!(x, expected, "scout position belongs to tick {}", snapshot.tick);
            observed += 1;
        }
        observed
    });

    run_ticks(&mut sim, 30);
    stop.store(true, Ordering::Relaxed);
    let observed = reader.join().expect("reader saw only committed snapshots");
    assert!(observed > 0);
    assert_eq!(sim.view().tick, 30);
    assert_eq!(sim.view().units[&scout].position, cell_pos(20, 10));
}

// =============================================================================
// 7. Standing orders
// =============================================================================

fn current(sim: &Simulation, id: EntityId) -> Option<Command> {
    sim.world()
        .unit(id)
        .and_then(|u| u.commands.current().map(|o| o.command.clone()))
}

#[test]
fn test_hold_fires_without_moving() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic"), (2, "magic")]));
    let archer = spawn_unit(&mut sim, 1, "archer", (10, 10));
    let swordman = spawn_unit(&mut sim, 2, "swordman", (20, 10));
    sim.issue(&order(1, archer, Command::Hold)).unwrap();

    run_ticks(&mut sim, 30);
    assert_eq!(sim.world().unit(archer).unwrap().state, UnitState::Idle);
    assert_eq!(sim.world().unit(swordman).unwrap().health.current, 150);

    sim.issue(&order(2, swordman, Command::Move { target: cell_pos(14, 10) }))
        .unwrap();
    run_ticks(&mut sim, 300);
    let unit = sim.world().unit(archer).unwrap();
    assert_eq!(unit.position, cell_pos(10, 10));
    assert_eq!(current(&sim, archer), Some(Command::Hold));
    assert!(sim.world().unit(swordman).unwrap().health.current < 150);
}

#[test]
fn test_patrol_walks_back_and_forth() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let scout = spawn_unit(&mut sim, 1, "scout", (5, 5));
    let patrol = Command::Patrol { target: cell_pos(10, 5) };
    sim.issue(&order(1, scout, patrol.clone())).unwrap();

    run_ticks(&mut sim, 5);
    assert_eq!(sim.world().unit(scout).unwrap().position, cell_pos(10, 5));
    run_ticks(&mut sim, 5);
    assert_eq!(sim.world().unit(scout).unwrap().position, cell_pos(5, 5));
    run_ticks(&mut sim, 5);
    assert_eq!(sim.world().unit(scout).unwrap().position, cell_pos(10, 5));
    assert_eq!(current(&sim, scout), Some(patrol));
}

#[test]
fn test_follow_keeps_close_until_leader_dies() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic")]));
    let leader = spawn_unit(&mut sim, 1, "worker", (5, 5));
    let follower = spawn_unit(&mut sim, 1, "worker", (3, 5));
    sim.issue(&order(1, leader, Command::Move { target: cell_pos(15, 5) }))
        .unwrap();
    sim.issue(&order(1, follower, Command::Follow { target: leader }))
        .unwrap();

    run_ticks(&mut sim, 500);
    let position = sim.world().unit(follower).unwrap().position;
    assert!(position.distance(cell_pos(15, 5)) <= Fixed::from_num(2));
    assert_eq!(current(&sim, follower), Some(Command::Follow { target: leader }));

    sim.world_mut().destroy(leader).unwrap();
    run_ticks(&mut sim, 2);
    assert!(sim.world().unit(follower).unwrap().commands.is_empty());
}

#[test]
fn test_guard_engages_intruder_then_returns() {
    let mut sim = simulation(&open_config(32, 32, &[(1, "magic"), (2, "magic")]));
    let ward = spawn_unit(&mut sim, 1, "worker", (5, 8));
    let archer = spawn_unit(&mut sim, 1, "archer", (5, 12));
    let swordman = spawn_unit(&mut sim, 2, "swordman", (20, 11));
    sim.issue(&order(1, archer, Command::Guard { target: ward }))
        .unwrap();

    run_ticks(&mut sim, 60);
    let post = cell_pos(5, 8);
    assert!(sim.world().unit(archer).unwrap().position.distance(post) <= Fixed::from_num(3));
    assert_eq!(sim.world().unit(swordman).unwrap().health.current, 150);

    sim.issue(&order(2, swordman, Command::Move { target: cell_pos(12, 11) }))
        .unwrap();
    let ran = run_until(&mut sim, 2000, |s| s.world().unit(swordman).is_none());
    assert!(ran < 2000, "guard never dealt with the intruder");

    run_ticks(&mut sim, 300);
    assert!(sim.world().unit(archer).unwrap().position.distance(post) <= Fixed::from_num(3));
    assert_eq!(current(&sim, archer), Some(Command::Guard { target: ward }));
}
