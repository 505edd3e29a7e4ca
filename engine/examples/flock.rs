use std::{cell::RefCell, rc::Rc};

use colonnade::ecs::{Query, RemoveListener, World};
use colonnade_macros::Component;

const ARENA: f32 = 100.0;
const FLOCK_SIZE: usize = 64;
const TICKS: usize = 50;

#[derive(Component, Default, Debug, Clone, Copy)]
struct Agent {
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
    energy: i32,
}

#[derive(Component, Default, Debug, Clone, Copy)]
struct Grounded;

#[derive(Component, Default, Debug, Clone, Copy)]
struct TickCount(usize);

fn spawn_flock(world: &mut World) {
    let archetype = world.archetype::<Agent>();
    for i in 0..FLOCK_SIZE {
        let entity = archetype.create_entity(world);
        // A cheap deterministic scatter; no need for a real RNG here.
        let angle = i as f32 * 0.618;
        world.set(
            entity,
            Agent {
                x: (i as f32 * 7.3) % ARENA,
                y: (i as f32 * 3.1) % ARENA,
                dx: angle.cos() * 2.0,
                dy: angle.sin() * 2.0,
                energy: 40 + (i as i32 % 20),
            },
        );
    }
}

fn tick(world: &mut World, movers: &mut Query) {
    let spawn_target = world.archetype::<Agent>();
    movers.for_each::<Agent, _>(world, |ops, entity, agent| {
        agent.x += agent.dx;
        agent.y += agent.dy;

        // Bounce off the arena walls.
        if agent.x < 0.0 || agent.x > ARENA {
            agent.dx = -agent.dx;
        }
        if agent.y < 0.0 || agent.y > ARENA {
            agent.dy = -agent.dy;
        }

        agent.energy -= 1;
        if agent.energy <= 0 {
            // Exhausted agents land and get replaced. Both operations are
            // structural, so they are deferred until the loop ends.
            ops.set(entity, Grounded);
            let fresh = ops.create_entity(spawn_target);
            ops.set(
                fresh,
                Agent {
                    x: ARENA / 2.0,
                    y: ARENA / 2.0,
                    dx: -agent.dx,
                    dy: -agent.dy,
                    energy: 60,
                },
            );
        }
    });
}

fn main() {
    let mut world = World::new("flock");
    world.set_data(TickCount(0));

    // Count grounded agents as their marker is removed on despawn.
    let landings = Rc::new(RefCell::new(0));
    let counter = landings.clone();
    world.on_remove::<Grounded>(RemoveListener::Value(Box::new(move |_grounded| {
        *counter.borrow_mut() += 1;
    })));

    spawn_flock(&mut world);

    let mut movers = Query::new();
    movers.has::<Agent>(&world).not::<Grounded>(&world);

    let mut grounded = Query::new();
    grounded.has::<Grounded>(&world);

    for _ in 0..TICKS {
        tick(&mut world, &mut movers);
        world.data_mut::<TickCount>().unwrap().0 += 1;

        // Reap everything that landed this tick.
        grounded.destroy_matching(&mut world);
    }

    let ticks = world.data::<TickCount>().unwrap().0;
    println!(
        "after {} ticks: {} agents aloft, {} landings, {} archetypes scanned",
        ticks,
        movers.entity_count(&world),
        landings.borrow(),
        movers.matching(&world).len(),
    );
}
