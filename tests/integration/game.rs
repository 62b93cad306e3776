//! A small pinball rule set driven end to end on a mock clock.
//!
//! Switch events are posted by the test instead of a random generator, so
//! every score is known in advance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tickflow::{Cancelled, Co, EventKey, Group, Sequencer, Watchdog};

const STANDUPS: [&str; 3] = ["standup target #1", "standup target #2", "standup target #3"];
const SLINGS: [&str; 2] = ["left sling", "right sling"];
const EXITS: [&str; 3] = ["left outlane", "right outlane", "down the middle"];

#[derive(Debug, Default)]
struct Game {
    score: i64,
    bonus: i64,
    kickback: bool,
    game_over: bool,
    log: Vec<String>,
}

type Shared = Arc<Mutex<Game>>;

fn award(
    game: &Shared,
    points: i64,
) {
    let mut game = game.lock();
    game.score += points;
    let line = format!("awarded {} points, score {}", points, game.score);
    game.log.push(line);
}

fn announce(
    game: &Shared,
    line: String,
) {
    game.lock().log.push(line);
}

fn watch_slings(
    co: &Co,
    game: Shared,
) -> Result<(), Cancelled> {
    let mut s = Sequencer::new();
    s.wait_for(SLINGS).do_(move || award(&game, 10)).looped();
    s.run(co)
}

fn watch_standups(
    co: &Co,
    game: Shared,
) -> Result<(), Cancelled> {
    let mut lit: HashMap<EventKey, bool> = STANDUPS.iter().map(|&k| (k.into(), false)).collect();
    loop {
        let event = co.wait_for(STANDUPS)?;
        let was_lit = lit.insert(event.key().clone(), true).unwrap_or(false);
        if was_lit {
            award(&game, 25);
        } else {
            award(&game, 100);
        }
        game.lock().bonus += 10;

        if lit.values().all(|&v| v) {
            let mut g = game.lock();
            if !g.kickback {
                g.kickback = true;
                g.log.push("kickback lit".to_string());
            }
            drop(g);
            lit.values_mut().for_each(|v| *v = false);
        }
    }
}

fn watch_exits(
    co: &Co,
    game: Shared,
) -> Result<(), Cancelled> {
    loop {
        let event = co.wait_for(EXITS)?;
        let drained = match event.key() {
            EventKey::Name(name) if name == "left outlane" => {
                award(&game, 125);
                let mut g = game.lock();
                if g.kickback {
                    g.kickback = false;
                    g.log.push("kickback".to_string());
                    false
                } else {
                    true
                }
            }
            EventKey::Name(name) if name == "right outlane" => {
                award(&game, 125);
                true
            }
            _ => true,
        };
        if drained {
            break;
        }
    }
    announce(&game, "ball drained".to_string());
    co.post("ball drained");
    Ok(())
}

fn basic_mode(
    co: &Co,
    game: Shared,
) -> Result<(), Cancelled> {
    let (g1, g2, g3) = (game.clone(), game.clone(), game.clone());
    co.spawn(move |co: &Co| watch_slings(co, g1)).map_err(|_| Cancelled)?;
    co.spawn(move |co: &Co| watch_standups(co, g2)).map_err(|_| Cancelled)?;
    co.spawn(move |co: &Co| watch_exits(co, g3)).map_err(|_| Cancelled)?;

    co.wait_for(["ball drained"])?;
    announce(&game, "end of ball".to_string());
    co.post("end of ball");
    Ok(())
}

fn game_mode(
    co: &Co,
    game: Shared,
) -> Result<(), Cancelled> {
    let mode = game.clone();
    co.spawn(move |co: &Co| basic_mode(co, mode)).map_err(|_| Cancelled)?;
    co.wait_for(["end of ball"])?;

    let (score, bonus) = {
        let g = game.lock();
        (g.score, g.bonus)
    };
    let (g1, g2, g3, g4) = (game.clone(), game.clone(), game.clone(), game);

    let mut s = Sequencer::new();
    s.sleep(Duration::from_secs(1))
        .do_(move || announce(&g1, format!("score: {}", score)))
        .sleep(Duration::from_secs(1))
        .do_(move || announce(&g2, format!("bonus: {}", bonus)))
        .sleep(Duration::from_secs(1))
        .do_(move || announce(&g3, format!("total score: {}", score + bonus)))
        .sleep(Duration::from_secs(2))
        .do_(move || {
            let mut g = g4.lock();
            g.game_over = true;
            g.log.push("game over".to_string());
        });
    s.run(co)
}

#[test]
fn test_full_ball() {
    let _wd = Watchdog::new(Duration::from_secs(10)).unwrap();
    let (group, clock) = Group::with_mock_clock();
    let game = Shared::default();

    let g = game.clone();
    group.spawn(move |co: &Co| game_mode(co, g)).unwrap();
    assert_eq!(group.running(), 5);

    for key in [
        "left sling",
        "standup target #1",
        "standup target #1",
        "standup target #2",
        "standup target #3",
        "left outlane",
        "right sling",
        "down the middle",
    ] {
        group.post(key);
    }
    group.tick();

    {
        let g = game.lock();
        assert_eq!(g.score, 470);
        assert_eq!(g.bonus, 40);
        assert!(!g.kickback);
        assert!(g.log.contains(&"kickback lit".to_string()));
        assert!(g.log.contains(&"kickback".to_string()));
        assert!(g.log.ends_with(&["ball drained".to_string(), "end of ball".to_string()]));
    }
    // Slings and standups outlived basic mode and are cancelled next tick.
    assert_eq!(group.running(), 3);

    let mut ticks = 0;
    while !game.lock().game_over {
        clock.add(Duration::from_secs(1));
        group.tick();
        ticks += 1;
        assert!(ticks <= 5, "game did not end");
    }
    assert_eq!(ticks, 5);
    assert_eq!(group.running(), 0);

    let g = game.lock();
    let tail: Vec<&str> = g.log.iter().rev().take(4).rev().map(String::as_str).collect();
    assert_eq!(tail, vec!["score: 470", "bonus: 40", "total score: 510", "game over"]);
}

#[test]
fn test_stop_mid_game() {
    let _wd = Watchdog::new(Duration::from_secs(10)).unwrap();
    let (group, _clock) = Group::with_mock_clock();
    let game = Shared::default();

    let g = game.clone();
    group.spawn(move |co: &Co| game_mode(co, g)).unwrap();
    group.post("left sling");
    group.tick();
    assert_eq!(game.lock().score, 10);

    group.stop();
    assert_eq!(group.running(), 0);

    group.post("left sling");
    group.tick();
    assert_eq!(game.lock().score, 10);
    assert!(!game.lock().game_over);
}
