//! Command validation, attachment and queue semantics.

use glest_core::map::TerrainPatch;
use glest_core::prelude::*;
use glest_test_utils::fixtures::{
    cell_pos, empty_simulation, open_config, order, run_ticks, set_resources, simulation,
    spawn_building, spawn_site, spawn_unit,
};

fn walled_config() -> GameConfig {
    let mut config = open_config(32, 32, &[(1, "magic"), (2, "magic")]);
    let wall = |from: (u32, u32), to: (u32, u32)| TerrainPatch {
        terrain: Terrain::Cliff,
        from,
        to,
    };
    config.map.terrain = vec![
        wall((18, 18), (22, 18)),
        wall((18, 22), (22, 22)),
        wall((18, 18), (18, 22)),
        wall((22, 18), (22, 22)),
    ];
    config
}

// =============================================================================
// Rejections
// =============================================================================

#[test]
fn test_rejections_leave_world_untouched() {
    let mut sim = empty_simulation(32, 32);
    let archer = spawn_unit(&mut sim, 1, "archer", (5, 5));
    let enemy = spawn_unit(&mut sim, 2, "swordman", (9, 5));
    let tower = spawn_building(&mut sim, 1, "mage_tower", (12, 12));
    let hash = sim.state_hash();

    let cases = [
        (CommandSubmission::new(7, archer, Command::Stop), CommandError::InvalidPlayer),
        (
            CommandSubmission::group(1, Vec::new(), Command::Hold),
            CommandError::Malformed,
        ),
        (order(1, 999, Command::Hold), CommandError::InvalidTarget),
        (order(2, archer, Command::Hold), CommandError::NotOwner),
        (order(1, archer, Command::Gather { node: 1 }), CommandError::UnsupportedCapability),
        (order(1, archer, Command::Attack { target: archer }), CommandError::InvalidTarget),
        (
            order(1, archer, Command::Move { target: cell_pos(40, 5) }),
            CommandError::InvalidTarget,
        ),
        (
            CommandSubmission::group(1, vec![archer, tower], Command::Hold),
            CommandError::Malformed,
        ),
        (order(1, tower, Command::Hold), CommandError::UnsupportedCapability),
        (
            order(1, archer, Command::ProduceUnit { unit_type: "worker".into() }),
            CommandError::UnsupportedCapability,
        ),
        (
            CommandSubmission::group(
                1,
                vec![tower, archer],
                Command::ProduceUnit { unit_type: "worker".into() },
            ),
            CommandError::Malformed,
        ),
        (
            order(2, tower, Command::ProduceUnit { unit_type: "worker".into() }),
            CommandError::NotOwner,
        ),
        (
            order(1, tower, Command::ProduceUnit { unit_type: "dragon".into() }),
            CommandError::UnsupportedCapability,
        ),
    ];
    for (submission, expected) in cases {
        assert_eq!(sim.issue(&submission), Err(expected.clone()), "{submission:?}");
        assert_eq!(sim.state_hash(), hash, "{submission:?} changed the world");
    }
    assert_eq!(sim.rejected_count(), 13);

    // Attacking an enemy is fine.
    sim.issue(&order(1, archer, Command::Attack { target: enemy })).unwrap();
}

#[test]
fn test_queued_rejection_emits_event_and_replies() {
    let mut sim = empty_simulation(16, 16);
    let worker = spawn_unit(&mut sim, 1, "worker", (2, 2));
    let (reply, outcome) = std::sync::mpsc::channel();
    sim.submit_with_reply(order(2, worker, Command::Hold), reply);
    assert_eq!(sim.pending_submissions(), 1);

    let events = sim.tick();
    assert_eq!(outcome.recv().unwrap(), Err(CommandError::NotOwner));
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::CommandRejected { player: 2, reason: CommandError::NotOwner }
    )));
    assert_eq!(sim.pending_submissions(), 0);
    assert_eq!(sim.rejected_count(), 1);
}

#[test]
fn test_unreachable_target_is_rejected() {
    let mut sim = simulation(&walled_config());
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));

    let inside = order(1, worker, Command::Move { target: cell_pos(20, 20) });
    assert_eq!(sim.issue(&inside), Err(CommandError::Unreachable));
    let cliff = order(1, worker, Command::Move { target: cell_pos(18, 20) });
    assert_eq!(sim.issue(&cliff), Err(CommandError::Unreachable));
    let outside = order(1, worker, Command::Move { target: cell_pos(25, 20) });
    assert_eq!(sim.issue(&outside), Ok(()));
}

#[test]
fn test_air_unit_crosses_cliffs() {
    let mut sim = simulation(&walled_config());
    let wisp = sim
        .world_mut()
        .create_unit(1, "wisp", cell_pos(5, 5), CreateOptions::free())
        .unwrap();
    sim.issue(&order(1, wisp, Command::Move { target: cell_pos(20, 20) }))
        .unwrap();
    run_ticks(&mut sim, 400);
    assert_eq!(sim.world().unit(wisp).unwrap().position, cell_pos(20, 20));
}

#[test]
fn test_build_checks_funds_placement_and_skill() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    let archer = spawn_unit(&mut sim, 1, "archer", (6, 6));
    spawn_building(&mut sim, 1, "mage_tower", (10, 10));
    let build = |cell| Command::Build {
        building_type: "energy_source".into(),
        cell,
    };

    assert_eq!(
        sim.issue(&order(1, archer, build((3, 3)))),
        Err(CommandError::UnsupportedCapability)
    );
    assert_eq!(
        sim.issue(&order(1, worker, build((10, 10)))),
        Err(CommandError::InvalidTarget)
    );
    assert!(
        sim.issue(&order(1, worker, build((31, 31)))).is_ok(),
        "corner cell on the map is valid"
    );
    set_resources(&mut sim, 1, &[("gold", 10)]);
    assert_eq!(
        sim.issue(&order(1, worker, build((3, 3)))),
        Err(CommandError::InsufficientResources)
    );
}

#[test]
fn test_existing_site_can_be_adopted_without_funds() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    let site = spawn_site(&mut sim, 1, "energy_source", (8, 5));
    set_resources(&mut sim, 1, &[]);

    sim.issue(&order(
        1,
        worker,
        Command::Build {
            building_type: "energy_source".into(),
            cell: (8, 5),
        },
    ))
    .unwrap();
    let events = run_ticks(&mut sim, 120);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::ActionStalled { target, .. } if *target == site
    )));
    assert!(!sim.world().building(site).unwrap().built);
}

// =============================================================================
// Idempotence and queues
// =============================================================================

#[test]
fn test_stop_on_idle_unit_is_a_no_op() {
    let mut sim = empty_simulation(16, 16);
    let worker = spawn_unit(&mut sim, 1, "worker", (2, 2));
    let hash = sim.state_hash();
    sim.issue(&order(1, worker, Command::Stop)).unwrap();
    assert_eq!(sim.state_hash(), hash);
    let unit = sim.world().unit(worker).unwrap();
    assert_eq!(unit.state, UnitState::Idle);
    assert!(unit.commands.is_empty());
}

#[test]
fn test_repeating_current_order_is_idempotent() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (2, 2));
    let go = order(1, worker, Command::Move { target: cell_pos(20, 2) });
    sim.issue(&go).unwrap();
    run_ticks(&mut sim, 5);

    let hash = sim.state_hash();
    sim.issue(&go).unwrap();
    assert_eq!(sim.state_hash(), hash);
    assert!(matches!(
        sim.world().unit(worker).unwrap().state,
        UnitState::Moving { .. }
    ));
}

#[test]
fn test_queued_orders_run_in_sequence() {
    let mut sim = empty_simulation(32, 32);
    let scout = spawn_unit(&mut sim, 1, "scout", (2, 2));
    sim.issue(&order(1, scout, Command::Move { target: cell_pos(6, 2) }))
        .unwrap();
    sim.issue(&order(1, scout, Command::Move { target: cell_pos(6, 6) }).queued())
        .unwrap();
    assert_eq!(sim.world().unit(scout).unwrap().commands.waiting_len(), 1);

    run_ticks(&mut sim, 4);
    assert_eq!(sim.world().unit(scout).unwrap().position, cell_pos(6, 2));
    run_ticks(&mut sim, 5);
    let unit = sim.world().unit(scout).unwrap();
    assert_eq!(unit.position, cell_pos(6, 6));
    assert!(unit.commands.is_empty());
}

#[test]
fn test_non_queued_order_replaces_queue() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (2, 2));
    sim.issue(&order(1, worker, Command::Move { target: cell_pos(20, 2) }))
        .unwrap();
    sim.issue(&order(1, worker, Command::Hold).queued()).unwrap();
    sim.issue(&order(1, worker, Command::Move { target: cell_pos(2, 20) }))
        .unwrap();

    let unit = sim.world().unit(worker).unwrap();
    assert_eq!(unit.commands.waiting_len(), 0);
    assert_eq!(
        unit.commands.current().map(|o| &o.command),
        Some(&Command::Move { target: cell_pos(2, 20) })
    );
    assert_eq!(unit.state, UnitState::Idle);
}

#[test]
fn test_stop_clears_orders() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (2, 2));
    sim.issue(&order(1, worker, Command::Move { target: cell_pos(20, 2) }))
        .unwrap();
    sim.issue(&order(1, worker, Command::Hold).queued()).unwrap();
    run_ticks(&mut sim, 3);

    sim.issue(&order(1, worker, Command::Stop)).unwrap();
    sim.tick();
    let unit = sim.world().unit(worker).unwrap();
    assert!(unit.commands.is_empty());
    assert_eq!(unit.state, UnitState::Idle);
    assert_eq!(unit.velocity, Vec2Fixed::ZERO);
}

// =============================================================================
// Groups and formations
// =============================================================================

#[test]
fn test_group_move_keeps_relative_positions() {
    let mut sim = empty_simulation(32, 32);
    let a = spawn_unit(&mut sim, 1, "scout", (2, 2));
    let b = spawn_unit(&mut sim, 1, "scout", (4, 2));
    sim.issue(&CommandSubmission::group(
        1,
        vec![b, a, b],
        Command::GroupMove {
            anchor: cell_pos(20, 20),
            offset: Vec2Fixed::ZERO,
        },
    ))
    .unwrap();
    run_ticks(&mut sim, 60);

    let pa = sim.world().unit(a).unwrap().position;
    let pb = sim.world().unit(b).unwrap().position;
    assert_eq!(pa, cell_pos(19, 20));
    assert_eq!(pb, cell_pos(21, 20));
}

#[test]
fn test_repeating_group_move_is_idempotent() {
    let mut sim = empty_simulation(32, 32);
    let a = spawn_unit(&mut sim, 1, "worker", (2, 2));
    let b = spawn_unit(&mut sim, 1, "worker", (4, 2));
    let go = CommandSubmission::group(
        1,
        vec![a, b],
        Command::GroupMove {
            anchor: cell_pos(20, 20),
            offset: Vec2Fixed::ZERO,
        },
    );
    sim.issue(&go).unwrap();
    run_ticks(&mut sim, 3);
    let before = sim.world().unit(a).unwrap().commands.current().cloned();

    // Positions have changed, so fresh offsets would differ.
    let hash = sim.state_hash();
    sim.issue(&go).unwrap();
    assert_eq!(sim.state_hash(), hash);
    assert_eq!(sim.world().unit(a).unwrap().commands.current().cloned(), before);
    assert!(matches!(
        sim.world().unit(b).unwrap().state,
        UnitState::Moving { .. }
    ));
}

#[test]
fn test_formation_line_spreads_units() {
    let mut sim = empty_simulation(32, 32);
    let ids: Vec<EntityId> = (0..3)
        .map(|i| spawn_unit(&mut sim, 1, "scout", (2 + i, 5)))
        .collect();
    sim.issue(&CommandSubmission::group(
        1,
        ids.clone(),
        Command::Formation {
            anchor: cell_pos(16, 16),
            shape: FormationShape::Line,
            offset: Vec2Fixed::ZERO,
        },
    ))
    .unwrap();
    run_ticks(&mut sim, 60);

    let xs: Vec<Fixed> = ids
        .iter()
        .map(|&id| sim.world().unit(id).unwrap().position.x)
        .collect();
    assert_eq!(xs, vec![Fixed::from_num(14), Fixed::from_num(16), Fixed::from_num(18)]);
    for &id in &ids {
        assert_eq!(sim.world().unit(id).unwrap().position.y, Fixed::from_num(16));
    }
}

// =============================================================================
// Building commands
// =============================================================================

#[test]
fn test_queue_full_is_rejected() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    set_resources(&mut sim, 1, &[("gold", 10_000), ("wood", 10_000)]);
    let produce = order(1, tower, Command::ProduceUnit { unit_type: "worker".into() });
    for _ in 0..5 {
        sim.issue(&produce).unwrap();
    }
    assert_eq!(sim.issue(&produce), Err(CommandError::QueueFull));
    assert_eq!(sim.world().resources(1).get("gold").copied(), Some(10_000 - 5 * 75));
}

#[test]
fn test_clear_queue_refunds_everything() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    set_resources(&mut sim, 1, &[("gold", 1000), ("wood", 1000)]);
    sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "archer".into() }))
        .unwrap();
    sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "worker".into() }))
        .unwrap();
    run_ticks(&mut sim, 10);

    sim.issue(&order(1, tower, Command::ClearProductionQueue)).unwrap();
    assert_eq!(sim.world().resources(1).get("gold").copied(), Some(1000));
    assert_eq!(sim.world().resources(1).get("wood").copied(), Some(1000));
    assert!(sim.world().building(tower).unwrap().production.is_empty());
}

#[test]
fn test_unfinished_building_cannot_produce() {
    let mut sim = empty_simulation(32, 32);
    let site = spawn_site(&mut sim, 1, "mage_tower", (4, 4));
    assert_eq!(
        sim.issue(&order(1, site, Command::ProduceUnit { unit_type: "worker".into() })),
        Err(CommandError::PrerequisitesNotMet)
    );
}

#[test]
fn test_meeting_point_must_be_on_map() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    assert_eq!(
        sim.issue(&order(
            1,
            tower,
            Command::SetMeetingPoint {
                position: Some(cell_pos(-1, 3))
            }
        )),
        Err(CommandError::InvalidTarget)
    );
    sim.issue(&order(
        1,
        tower,
        Command::SetMeetingPoint {
            position: Some(cell_pos(10, 4)),
        },
    ))
    .unwrap();
    assert_eq!(
        sim.world().building(tower).unwrap().meeting_point,
        Some(cell_pos(10, 4))
    );
}
