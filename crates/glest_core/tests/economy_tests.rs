//! Gathering, construction, repair, generation, research and upgrades.

use glest_core::map::ResourcePlacement;
use glest_core::prelude::*;
use glest_test_utils::fixtures::{
    cell_pos, empty_simulation, open_config, order, run_ticks, run_until, set_resources,
    simulation, spawn_building, spawn_site, spawn_unit,
};

fn amount(sim: &Simulation, player: PlayerId, resource: &str) -> u32 {
    sim.world().resources(player).get(resource).copied().unwrap_or(0)
}

// =============================================================================
// Gathering
// =============================================================================

#[test]
fn test_worker_drains_node_into_store() {
    let mut config = open_config(32, 32, &[(1, "magic")]);
    config.map.resources = vec![ResourcePlacement {
        resource: "gold".into(),
        cell: (12, 10),
        amount: 25,
    }];
    let mut sim = simulation(&config);
    spawn_building(&mut sim, 1, "mage_tower", (4, 10));
    let worker = spawn_unit(&mut sim, 1, "worker", (8, 10));
    let node = *sim.world().nodes().keys().next().unwrap();

    sim.issue(&order(1, worker, Command::Gather { node })).unwrap();
    let mut events = Vec::new();
    for _ in 0..4000 {
        events.extend(sim.tick());
        if sim.world().unit(worker).unwrap().commands.is_empty() {
            break;
        }
    }

    assert_eq!(amount(&sim, 1, "gold"), 125);
    assert!(sim.world().node(node).is_none());
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::NodeDepleted { node: n } if *n == node)));
    let gathered: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, GameEvent::ResourcesChanged { reason: ChangeReason::Gathered, .. }))
        .collect();
    assert_eq!(gathered.len(), 3, "two full loads of 10 and a last load of 5");
    let unit = sim.world().unit(worker).unwrap();
    assert_eq!(unit.state, UnitState::Idle);
    assert_eq!(unit.carried_total(), 0);
}

#[test]
fn test_gatherer_without_store_waits_loaded() {
    let mut config = open_config(32, 32, &[(1, "magic")]);
    config.map.resources = vec![ResourcePlacement {
        resource: "wood".into(),
        cell: (6, 5),
        amount: 100,
    }];
    let mut sim = simulation(&config);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    let node = *sim.world().nodes().keys().next().unwrap();
    sim.issue(&order(1, worker, Command::Gather { node })).unwrap();

    run_ticks(&mut sim, 600);
    let unit = sim.world().unit(worker).unwrap();
    assert_eq!(unit.carried.get("wood").copied(), Some(10));
    assert!(unit.commands.current().is_some());
    assert_eq!(sim.world().node(node).unwrap().amount, 90);
    assert_eq!(amount(&sim, 1, "wood"), 50);
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_construction_pays_as_it_goes() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    sim.issue(&order(
        1,
        worker,
        Command::Build {
            building_type: "energy_source".into(),
            cell: (6, 5),
        },
    ))
    .unwrap();

    sim.tick();
    let site = sim
        .world()
        .entities()
        .buildings()
        .find(|b| b.building_type == "energy_source")
        .map(|b| b.id)
        .expect("site placed on the first tick");
    assert_eq!(amount(&sim, 1, "gold"), 100);

    // Half way: half the cost.
    run_ticks(&mut sim, 120);
    let gold = amount(&sim, 1, "gold");
    assert!((74..=76).contains(&gold), "paid {} so far", 100 - gold);

    let events = run_ticks(&mut sim, 200);
    let building = sim.world().building(site).unwrap();
    assert!(building.built);
    assert!(building.health.is_full());
    assert_eq!(amount(&sim, 1, "gold"), 50);
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::BuildingCompleted { building, .. } if *building == site)));
    assert!(sim.world().unit(worker).unwrap().commands.is_empty());
}

#[test]
fn test_stalled_construction_resumes_when_funded() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    sim.issue(&order(
        1,
        worker,
        Command::Build {
            building_type: "energy_source".into(),
            cell: (6, 5),
        },
    ))
    .unwrap();
    run_ticks(&mut sim, 30);
    set_resources(&mut sim, 1, &[]);

    let events = run_ticks(&mut sim, 60);
    let stalls = events
        .iter()
        .filter(|e| matches!(e, GameEvent::ActionStalled { .. }))
        .count();
    assert_eq!(stalls, 1, "stall is announced once");
    let site = sim.world().entities().buildings().next().unwrap();
    let progress = site.build_progress;
    assert!(!site.built);

    set_resources(&mut sim, 1, &[("gold", 100)]);
    run_ticks(&mut sim, 300);
    let site = sim.world().entities().buildings().next().unwrap();
    assert!(site.built);
    assert!(site.build_progress > progress);
}

#[test]
fn test_stall_gives_up_after_grace() {
    let mut config = open_config(32, 32, &[(1, "magic")]);
    config.stall_grace_seconds = Fixed::ONE;
    let mut sim = simulation(&config);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    sim.issue(&order(
        1,
        worker,
        Command::Build {
            building_type: "energy_source".into(),
            cell: (6, 5),
        },
    ))
    .unwrap();
    run_ticks(&mut sim, 30);
    set_resources(&mut sim, 1, &[]);

    let events = run_ticks(&mut sim, 120);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::CommandFailed { unit, reason: CommandError::InsufficientResources } if *unit == worker
    )));
    assert!(sim.world().unit(worker).unwrap().commands.is_empty());
    // The site stays for someone else to finish.
    assert!(sim.world().entities().buildings().any(|b| !b.built));
}

#[test]
fn test_repair_finishes_unbuilt_site() {
    let mut sim = empty_simulation(32, 32);
    let worker = spawn_unit(&mut sim, 1, "worker", (5, 5));
    let site = spawn_site(&mut sim, 1, "energy_source", (6, 5));
    sim.issue(&order(1, worker, Command::Repair { target: site })).unwrap();
    run_ticks(&mut sim, 260);

    let building = sim.world().building(site).unwrap();
    assert!(building.built);
    assert_eq!(amount(&sim, 1, "gold"), 50);
}

#[test]
fn test_repair_restores_damaged_building() {
    let mut sim = empty_simulation(32, 32);
    let source = spawn_building(&mut sim, 1, "energy_source", (12, 10));
    let raider = spawn_unit(&mut sim, 2, "swordman", (13, 10));
    sim.issue(&order(2, raider, Command::Attack { target: source })).unwrap();
    run_ticks(&mut sim, 61);
    sim.issue(&order(2, raider, Command::Stop)).unwrap();

    let damaged = sim.world().building(source).unwrap().health;
    // Slashing against stone: floor(12 × 0.5) per hit.
    assert_eq!(damaged.current, 300 - 2 * 6);

    let worker = spawn_unit(&mut sim, 1, "worker", (10, 10));
    let gold_before = amount(&sim, 1, "gold");
    sim.issue(&order(1, worker, Command::Repair { target: source })).unwrap();
    run_until(&mut sim, 600, |s| {
        s.world().unit(worker).is_some_and(|u| u.commands.is_empty())
    });

    assert!(sim.world().building(source).unwrap().health.is_full());
    let paid = gold_before - amount(&sim, 1, "gold");
    assert!(paid <= 2, "repair of 12/300 HP costs at most 4% of 50 gold, paid {paid}");
    assert_eq!(
        sim.issue(&order(1, worker, Command::Repair { target: source })),
        Err(CommandError::InvalidTarget)
    );
}

// =============================================================================
// Generation
// =============================================================================

#[test]
fn test_generation_credits_whole_units_per_second() {
    let mut sim = empty_simulation(16, 16);
    spawn_building(&mut sim, 1, "energy_source", (3, 3));
    spawn_site(&mut sim, 1, "energy_source", (6, 6));

    run_ticks(&mut sim, 59);
    assert_eq!(amount(&sim, 1, "energy"), 0);
    let events = sim.tick();
    assert_eq!(amount(&sim, 1, "energy"), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::ResourcesChanged { player: 1, reason: ChangeReason::Generated, .. }
    )));
    run_ticks(&mut sim, 140);
    assert_eq!(amount(&sim, 1, "energy"), 3, "unfinished sites do not generate");
}

// =============================================================================
// Production, research and upgrades
// =============================================================================

#[test]
fn test_produced_unit_walks_to_meeting_point() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    sim.issue(&order(
        1,
        tower,
        Command::SetMeetingPoint {
            position: Some(cell_pos(12, 4)),
        },
    ))
    .unwrap();
    sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "worker".into() }))
        .unwrap();

    let events = run_ticks(&mut sim, 70);
    let unit = events
        .iter()
        .find_map(|e| match e {
            GameEvent::ProductionComplete { unit, .. } => *unit,
            _ => None,
        })
        .expect("worker produced");
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::UnitCreated { unit: u, .. } if *u == unit)));

    run_ticks(&mut sim, 400);
    assert_eq!(sim.world().unit(unit).unwrap().position, cell_pos(12, 4));
}

#[test]
fn test_research_unlocks_and_boosts_new_units() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    set_resources(&mut sim, 1, &[("gold", 1000), ("wood", 1000)]);
    let research = |tech: &str| {
        order(1, tower, Command::StartResearch { tech: tech.to_string() })
    };

    assert_eq!(
        sim.issue(&research("arcane_flight")),
        Err(CommandError::PrerequisitesNotMet)
    );
    assert_eq!(
        sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "wisp".into() })),
        Err(CommandError::PrerequisitesNotMet)
    );
    assert_eq!(
        WorldSnapshot::capture(sim.world()).get_available_technologies(1),
        &["improved_bows".to_string()][..]
    );

    sim.issue(&research("improved_bows")).unwrap();
    assert_eq!(sim.issue(&research("improved_bows")), Err(CommandError::AlreadyResearched));
    let events = run_ticks(&mut sim, 200);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::ResearchComplete { player: 1, tech } if tech == "improved_bows"
    )));
    assert!(sim.world().player(1).unwrap().has_tech("improved_bows"));
    assert_eq!(sim.issue(&research("improved_bows")), Err(CommandError::AlreadyResearched));
    assert_eq!(
        sim.view().get_available_technologies(1),
        &["arcane_flight".to_string()][..]
    );

    let archer = spawn_unit(&mut sim, 1, "archer", (10, 10));
    assert_eq!(sim.world().unit(archer).unwrap().stats.attack_strength, 12);
    let worker = spawn_unit(&mut sim, 1, "worker", (12, 10));
    assert_eq!(sim.world().unit(worker).unwrap().stats.attack_strength, 0);
}

#[test]
fn test_upgrades_stop_at_max_level() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    set_resources(&mut sim, 1, &[("gold", 1000)]);
    let upgrade = order(1, tower, Command::StartUpgrade);

    sim.issue(&upgrade).unwrap();
    sim.issue(&upgrade).unwrap();
    assert_eq!(sim.issue(&upgrade), Err(CommandError::MaxUpgradeLevel));
    assert_eq!(amount(&sim, 1, "gold"), 900);

    run_ticks(&mut sim, 620);
    let building = sim.world().building(tower).unwrap();
    assert_eq!(building.upgrade_level, 2);
    assert_eq!(building.health.max, 1200);
    assert_eq!(building.production_speed, Fixed::from_num(1.5));
    assert_eq!(sim.issue(&upgrade), Err(CommandError::MaxUpgradeLevel));
}

#[test]
fn test_destroyed_building_refunds_its_queue() {
    let mut sim = empty_simulation(32, 32);
    let tower = spawn_building(&mut sim, 1, "mage_tower", (4, 4));
    sim.issue(&order(1, tower, Command::ProduceUnit { unit_type: "worker".into() }))
        .unwrap();
    run_ticks(&mut sim, 10);
    assert_eq!(amount(&sim, 1, "gold"), 25);

    sim.world_mut().destroy(tower).unwrap();
    assert_eq!(amount(&sim, 1, "gold"), 100);
    let events = run_ticks(&mut sim, 2);
    assert!(events.iter().any(|e| matches!(e, GameEvent::ProductionFailed { .. })));
    assert!(sim.world().building(tower).is_none());
}
