//! Two boards joined edge to edge through the channel transport.
//!
//! `left` is a 4x1 strip whose east neighbor of (3, 0) is (0, 0) on `right`,
//! and vice versa. Particles `a` only move east.

use std::thread;
use std::time::{Duration, Instant};
use zoo_core::{
    Board, BoardConfig, ChannelTransport, PatternSet, Point, RemoteCellCoord, RemoteMessage, SharedBoard, StepOutcome,
    Topology,
};

const RULES: &str = r#"{
    "rules": [
        { "dir": "e", "source": "a", "target": "_", "new_source": "_", "new_target": "a" }
    ]
}"#;

fn board(address: &str, seed: u64) -> Board {
    let config = BoardConfig {
        address: address.to_string(),
        seed: Some(seed),
        ..BoardConfig::with_size(4, 1)
    };
    let patterns = PatternSet::from_json_str(RULES, Topology::Square4).unwrap();
    Board::new(config, patterns).unwrap()
}

struct Linked {
    left: Board,
    right: Board,
    left_inbox: async_channel::Receiver<RemoteMessage>,
    right_inbox: async_channel::Receiver<RemoteMessage>,
}

fn linked() -> Linked {
    let mut transport = ChannelTransport::new();
    let left_inbox = transport.register("left");
    let right_inbox = transport.register("right");

    let mut left = board("left", 1);
    let mut right = board("right", 2);
    assert!(left.connect_remote(Point::new(4, 0), RemoteCellCoord::new("right", Point::new(0, 0))));
    assert!(right.connect_remote(Point::new(-1, 0), RemoteCellCoord::new("left", Point::new(3, 0))));
    assert!(!left.connect_remote(Point::new(0, 0), RemoteCellCoord::new("right", Point::new(0, 0))));
    left.set_transport(Box::new(transport.clone()));
    right.set_transport(Box::new(transport));

    Linked {
        left,
        right,
        left_inbox,
        right_inbox,
    }
}

/// Deliver queued messages until both inboxes are empty.
fn pump(boards: &mut Linked) {
    loop {
        let mut delivered = false;
        while let Ok(message) = boards.right_inbox.try_recv() {
            boards.right.handle_message(message);
            delivered = true;
        }
        while let Ok(message) = boards.left_inbox.try_recv() {
            boards.left.handle_message(message);
            delivered = true;
        }
        if !delivered {
            break;
        }
    }
}

#[test]
fn test_particle_crosses_the_boundary() {
    let mut boards = linked();
    let edge = Point::new(3, 0);
    boards.left.set_particle(edge, "a");

    let mut steps = 0;
    while boards.left.step() != StepOutcome::RemoteRequested {
        steps += 1;
        assert!(steps < 1000, "no remote request");
    }
    let token = boards.left.write_count(edge).unwrap();
    pump(&mut boards);

    assert_eq!(boards.left.particle_name(edge), Some("_"));
    assert_eq!(boards.right.particle_name(Point::new(0, 0)), Some("a"));
    assert_eq!(boards.left.write_count(edge), Some(token + 1));
    assert_eq!(boards.left.count("a") + boards.right.count("a"), 1);
}

#[test]
fn test_stale_return_is_discarded() {
    let mut boards = linked();
    let edge = Point::new(3, 0);
    boards.left.set_particle(edge, "a");

    while boards.left.step() != StepOutcome::RemoteRequested {}
    // Rewrite the source before the reply comes back.
    boards.left.set_particle(edge, "wall");
    pump(&mut boards);

    assert_eq!(boards.left.particle_name(edge), Some("wall"));
    assert_eq!(boards.right.particle_name(Point::new(0, 0)), Some("a"));
}

#[test]
fn test_raw_evolve_request_gets_a_reply() {
    let mut boards = linked();
    let request = serde_json::json!({
        "type": "evolve",
        "target": { "x": 0, "y": 0 },
        "source_state": "a",
        "dir": 1,
        "energy_barrier": 0.0,
        "source": { "x": 3, "y": 0 },
        "return_addr": "left",
        "write_count": 0
    });
    boards.right.handle_raw_message(&request.to_string());

    assert_eq!(boards.right.particle_name(Point::new(0, 0)), Some("a"));
    match boards.left_inbox.try_recv() {
        Ok(RemoteMessage::Return {
            source,
            new_state,
            write_count,
            ..
        }) => {
            assert_eq!(source, Point::new(3, 0));
            assert_eq!(new_state, "_");
            assert_eq!(write_count, 0);
        }
        other => panic!("expected a return, got {:?}", other),
    }
}

#[test]
fn test_bonded_source_cannot_cross() {
    let edge = Point::new(3, 0);
    let patterns = PatternSet::from_json_str(
        r#"{"rules": [{ "dir": "e", "source": "a", "target": "_", "new_source": "_", "new_target": "a",
                       "required": [{ "from": "x", "to": "s", "name": "tether" }] }]}"#,
        Topology::Square4,
    )
    .unwrap();
    let mut right = Board::new(
        BoardConfig {
            address: "right".into(),
            ..BoardConfig::with_size(4, 1)
        },
        patterns,
    )
    .unwrap();
    let mut transport = ChannelTransport::new();
    let left_inbox = transport.register("left");
    right.set_transport(Box::new(transport));

    right.handle_message(RemoteMessage::Evolve {
        target: Point::new(0, 0),
        source_state: "a".into(),
        dir: 1,
        energy_barrier: 0.0,
        source: edge,
        return_addr: "left".into(),
        write_count: 1,
    });
    assert_eq!(right.particle_name(Point::new(0, 0)), Some("_"));
    match left_inbox.try_recv() {
        Ok(RemoteMessage::Return { new_state, .. }) => assert_eq!(new_state, "a"),
        other => panic!("expected a return, got {:?}", other),
    }
}

#[test]
fn test_workers_carry_particles_across() {
    let boards = linked();
    let left = SharedBoard::new(boards.left);
    let right = SharedBoard::new(boards.right);
    left.with_board(|b| b.set_particle(Point::new(0, 0), "a"));

    let left_worker = left.spawn_inbound_worker(boards.left_inbox);
    let right_worker = right.spawn_inbound_worker(boards.right_inbox);

    let deadline = Instant::now() + Duration::from_secs(5);
    while right.with_board(|b| b.count("a")) == 0 {
        assert!(Instant::now() < deadline, "particle never reached the right board");
        left.tick();
        right.tick();
        thread::sleep(Duration::from_millis(1));
    }

    left_worker.stop();
    right_worker.stop();
    for shared in [&left, &right] {
        shared.with_board(|b| {
            let cells: usize = b.particle_counts().iter().map(|(_, c)| c).sum();
            assert_eq!(cells, 4);
            assert!(b.check_bond_consistency().is_ok());
        });
    }
}
