//! Playback engine integration tests
//!
//! Drive a real engine through the control handle with the in-memory sink
//! and resolver. The tokio clock is paused so positions are exact.

mod helpers;

use djbot::control::ControlRequest;
use djbot::error::Error;
use djbot::session::QUEUE_CAPACITY;
use djbot_common::events::{BotEvent, EnginePhase, FinishReason};
use helpers::{approx, wait_for, Behavior, TestSession, DEFAULT_CHANNEL, TRACK_SECONDS};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_add_to_idle_session_starts_playback() {
    let session = TestSession::start();

    let message = session.add("first song").await;
    assert_eq!(message, "Added first song to queue (position 1)");

    session.wait_for_plays(1).await;
    assert_eq!(session.sink.connected_to().as_deref(), Some(DEFAULT_CHANNEL));

    let play = session.sink.last_play().unwrap();
    assert_eq!(play.path, session.path_for("first song"));
    assert_eq!(play.options.start_offset, 0.0);

    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.current.as_deref(), Some("first song"));
    assert!(snapshot.queue.is_empty());
    assert_eq!(snapshot.duration, TRACK_SECONDS);
    assert_eq!(snapshot.phase, EnginePhase::Playing);
    assert!(snapshot.connected);

    sleep(Duration::from_secs(5)).await;
    let position = session.position().await;
    assert!(approx(position, 5.0, 0.2), "position was {}", position);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_rejects_tracks_beyond_capacity() {
    let session = TestSession::start();

    // One track becomes current, the rest fill the queue
    for i in 0..=QUEUE_CAPACITY {
        session.add(&format!("song {}", i)).await;
        if i == 0 {
            session.wait_for_plays(1).await;
        }
    }

    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.queue.len(), QUEUE_CAPACITY);

    let err = session.control.add("one too many").await.unwrap_err();
    assert!(matches!(err, Error::QueueFull(QUEUE_CAPACITY)), "got {:?}", err);
    assert!(!session.path_for("one too many").exists());

    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.queue.len(), QUEUE_CAPACITY);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_restarts_stream_at_offset() {
    let session = TestSession::start();
    session.add("seekable").await;
    session.wait_for_plays(1).await;

    sleep(Duration::from_secs(3)).await;
    let message = session.control.seek(37.0).await.unwrap();
    assert_eq!(message, "Seeked to 0:37");

    assert_eq!(session.sink.play_count(), 2);
    let play = session.sink.last_play().unwrap();
    assert_eq!(play.path, session.path_for("seekable"));
    assert!(approx(play.options.start_offset, 37.0, 0.001));

    let position = session.position().await;
    assert!(approx(position, 37.0, 0.2), "position was {}", position);

    sleep(Duration::from_secs(2)).await;
    let position = session.position().await;
    assert!(approx(position, 39.0, 0.2), "position was {}", position);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_volume_change_keeps_position() {
    let session = TestSession::start();
    session.add("loud").await;
    session.wait_for_plays(1).await;

    sleep(Duration::from_secs(40)).await;
    let message = session.control.set_volume(50).await.unwrap();
    assert_eq!(message, "Volume set to 50%");

    let play = session.sink.last_play().unwrap();
    assert!(
        approx(play.options.start_offset, 40.0, 0.2),
        "restarted at {}",
        play.options.start_offset
    );
    assert_eq!(play.options.volume, 0.5);

    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.volume, 50);
    assert_eq!(snapshot.current.as_deref(), Some("loud"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_volume_without_track_is_stored() {
    let session = TestSession::start();

    let message = session.control.set_volume(20).await.unwrap();
    assert_eq!(message, "Volume set to 20%");

    session.add("quiet").await;
    session.wait_for_plays(1).await;
    assert_eq!(session.sink.last_play().unwrap().options.volume, 0.2);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_volume_racing_skip_never_carries_offset_to_next_track() {
    let session = TestSession::start();
    session.add("first").await;
    session.wait_for_plays(1).await;
    session.add("second").await;

    sleep(Duration::from_secs(40)).await;
    let volume = tokio::spawn({
        let control = session.control.clone();
        async move { control.set_volume(50).await }
    });
    let skip = tokio::spawn({
        let control = session.control.clone();
        async move { control.execute(ControlRequest::Skip).await }
    });
    volume.await.unwrap().unwrap();
    skip.await.unwrap().unwrap();

    session.wait_for_current(Some("second")).await;
    let second = session.path_for("second");
    for play in session.sink.plays().iter().filter(|p| p.path == second) {
        assert!(
            play.options.start_offset < 1.0,
            "second track launched at {}",
            play.options.start_offset
        );
    }
    let play = session.sink.last_play().unwrap();
    assert_eq!(play.path, second);
    assert_eq!(play.options.volume, 0.5);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_volume_while_paused_keeps_frozen_position() {
    let session = TestSession::start();
    session.add("hushed").await;
    session.wait_for_plays(1).await;

    sleep(Duration::from_secs(10)).await;
    session.control.execute(ControlRequest::Pause).await.unwrap();
    let mut events = session.events.subscribe();

    let message = session.control.set_volume(30).await.unwrap();
    assert_eq!(message, "Volume set to 30%");
    assert_eq!(session.sink.play_count(), 1);
    assert!(approx(session.position().await, 10.0, 0.2));
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, BotEvent::Seeked { .. }), "unexpected {:?}", event);
    }

    session.control.execute(ControlRequest::Resume).await.unwrap();
    let play = session.sink.last_play().unwrap();
    assert!(approx(play.options.start_offset, 10.0, 0.2));
    assert_eq!(play.options.volume, 0.3);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_freezes_position_and_resume_continues() {
    let session = TestSession::start();
    session.add("pausable").await;
    session.wait_for_plays(1).await;

    sleep(Duration::from_secs(10)).await;
    session.control.execute(ControlRequest::Pause).await.unwrap();
    assert!(!session.sink.is_streaming());

    sleep(Duration::from_secs(30)).await;
    let snapshot = session.control.snapshot().await.unwrap();
    assert!(snapshot.paused);
    assert_eq!(snapshot.phase, EnginePhase::Paused);
    assert!(approx(snapshot.position, 10.0, 0.2), "position was {}", snapshot.position);

    // The stopped stream's end notification must not finish the track
    assert_eq!(snapshot.current.as_deref(), Some("pausable"));
    assert!(session.path_for("pausable").exists());

    session.control.execute(ControlRequest::Resume).await.unwrap();
    assert_eq!(session.sink.play_count(), 2);
    let play = session.sink.last_play().unwrap();
    assert!(approx(play.options.start_offset, 10.0, 0.2));

    let snapshot = session.control.snapshot().await.unwrap();
    assert!(!snapshot.paused);
    assert_eq!(snapshot.phase, EnginePhase::Playing);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_while_paused_applies_on_resume() {
    let session = TestSession::start();
    session.add("paused seek").await;
    session.wait_for_plays(1).await;

    session.control.execute(ControlRequest::Pause).await.unwrap();
    session.control.seek(90.0).await.unwrap();
    assert_eq!(session.sink.play_count(), 1);
    assert!(approx(session.position().await, 90.0, 0.001));

    session.control.execute(ControlRequest::Resume).await.unwrap();
    let play = session.sink.last_play().unwrap();
    assert!(approx(play.options.start_offset, 90.0, 0.001));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_finished_track_advances_and_deletes_file() {
    let session = TestSession::start();
    let mut events = session.events.subscribe();

    session.add("one").await;
    session.wait_for_plays(1).await;
    session.add("two").await;

    assert!(session.sink.end_active(None));
    session.wait_for_plays(2).await;
    session.wait_for_current(Some("two")).await;

    assert!(!session.path_for("one").exists());
    assert!(session.path_for("two").exists());

    let mut finished = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BotEvent::TrackFinished { title, reason, .. } = event {
            finished.push((title, reason));
        }
    }
    assert_eq!(finished, vec![("one".to_string(), FinishReason::Completed)]);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_single_replays_without_deleting() {
    let session = TestSession::start();
    session.add("on repeat").await;
    session.wait_for_plays(1).await;
    session.add("never reached").await;

    let reply = session.control.execute(ControlRequest::Loop).await.unwrap();
    assert_eq!(reply.message, "Loop is now on");
    assert!(reply.snapshot.loop_single);

    for round in 2..=4 {
        sleep(Duration::from_secs(5)).await;
        assert!(session.sink.end_active(None));
        session.wait_for_plays(round).await;
    }

    let path = session.path_for("on repeat");
    assert!(path.exists());
    assert!(session.sink.plays().iter().all(|p| p.path == path));

    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.current.as_deref(), Some("on repeat"));
    assert_eq!(snapshot.queue, vec!["never reached".to_string()]);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_queue_cycles_tracks() {
    let session = TestSession::start();
    session.add("a").await;
    session.wait_for_plays(1).await;
    session.add("b").await;

    let reply = session
        .control
        .execute(ControlRequest::LoopQueue)
        .await
        .unwrap();
    assert!(reply.snapshot.loop_queue);
    assert!(!reply.snapshot.loop_single);

    for round in 2..=4 {
        sleep(Duration::from_secs(5)).await;
        assert!(session.sink.end_active(None));
        session.wait_for_plays(round).await;
    }

    let order: Vec<_> = session.sink.plays().into_iter().map(|p| p.path).collect();
    assert_eq!(
        order,
        vec![
            session.path_for("a"),
            session.path_for("b"),
            session.path_for("a"),
            session.path_for("b"),
        ]
    );
    assert!(session.path_for("a").exists());
    assert!(session.path_for("b").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_launch_moves_to_next_track() {
    let session = TestSession::start();
    let broken = session.path_for("broken");
    session.sink.fail_path(&broken);

    session.add("broken").await;
    session.wait_for_current(None).await;
    assert_eq!(session.sink.play_count(), 0);
    assert!(!broken.exists());

    session.add("working").await;
    session.wait_for_plays(1).await;
    assert_eq!(session.sink.last_play().unwrap().path, session.path_for("working"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_right_after_start_is_a_failed_start() {
    let session = TestSession::start();
    session.add("flaky").await;
    session.wait_for_plays(1).await;
    session.add("steady").await;

    // Loop single must not retry a track that cannot play
    session.control.execute(ControlRequest::Loop).await.unwrap();
    assert!(session.sink.end_active(Some("Invalid data found when processing input")));

    session.wait_for_plays(2).await;
    session.wait_for_current(Some("steady")).await;
    assert!(!session.path_for("flaky").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_skip_plays_next() {
    let session = TestSession::start();
    session.add("skipped").await;
    session.wait_for_plays(1).await;
    session.add("next").await;

    let reply = session.control.execute(ControlRequest::Skip).await.unwrap();
    assert_eq!(reply.message, "Skipped skipped");

    session.wait_for_plays(2).await;
    session.wait_for_current(Some("next")).await;
    assert!(!session.path_for("skipped").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_out_of_range_is_a_no_op() {
    let session = TestSession::start();
    session.add("current").await;
    session.wait_for_plays(1).await;
    for title in ["q1", "q2", "q3"] {
        session.add(title).await;
    }

    let reply = session
        .control
        .execute(ControlRequest::Remove(5))
        .await
        .unwrap();
    assert_eq!(reply.message, "No track at position 5");
    assert_eq!(reply.snapshot.queue, vec!["q1", "q2", "q3"]);

    let reply = session
        .control
        .execute(ControlRequest::Remove(2))
        .await
        .unwrap();
    assert_eq!(reply.message, "Removed q2");
    assert_eq!(reply.snapshot.queue, vec!["q1", "q3"]);
    assert!(!session.path_for("q2").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_keeps_current_track() {
    let session = TestSession::start();
    session.add("keeper").await;
    session.wait_for_plays(1).await;
    session.add("gone").await;

    let reply = session.control.execute(ControlRequest::Clear).await.unwrap();
    assert!(reply.snapshot.queue.is_empty());
    assert_eq!(reply.snapshot.current.as_deref(), Some("keeper"));
    assert!(!session.path_for("gone").exists());
    assert!(session.path_for("keeper").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_current_and_stays_idle() {
    let session = TestSession::start();
    session.add("stopped").await;
    session.wait_for_plays(1).await;

    let reply = session.control.execute(ControlRequest::Stop).await.unwrap();
    assert_eq!(reply.snapshot.current, None);
    assert_eq!(reply.snapshot.phase, EnginePhase::Idle);
    assert!(!session.path_for("stopped").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_stop_plays_remaining_queue() {
    let session = TestSession::start();
    session.add("halted").await;
    session.wait_for_plays(1).await;
    session.add("waiting").await;

    session.control.execute(ControlRequest::Stop).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(session.sink.play_count(), 1);

    let reply = session.control.execute(ControlRequest::Resume).await.unwrap();
    assert_eq!(reply.message, "Resuming queue");

    session.wait_for_plays(2).await;
    session.wait_for_current(Some("waiting")).await;
    assert_eq!(session.sink.last_play().unwrap().path, session.path_for("waiting"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_with_nothing_queued() {
    let session = TestSession::start();
    let reply = session.control.execute(ControlRequest::Resume).await.unwrap();
    assert_eq!(reply.message, "Nothing is paused");
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_playlist_partial_success() {
    let session = TestSession::start();
    let url = "https://www.youtube.com/playlist?list=PLmix";
    session.resolver.playlist(url, &["track one", "missing", "track two"]);
    session.resolver.on("missing", Behavior::Fail);

    let message = session.control.add_playlist(url).await.unwrap();
    assert_eq!(message, "Added 2 songs from playlist");
    assert_eq!(session.resolver.resolved(), vec!["track one", "missing", "track two"]);

    session.wait_for_plays(1).await;
    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.current.as_deref(), Some("track one"));
    assert_eq!(snapshot.queue, vec!["track two"]);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_add_with_playlist_link_expands() {
    let session = TestSession::start();
    let url = "https://music.youtube.com/playlist?list=PLnorm";
    session
        .resolver
        .playlist("https://www.youtube.com/playlist?list=PLnorm", &["x", "y"]);

    let message = session.control.add(url).await.unwrap();
    assert_eq!(message, "Added 2 songs from playlist");

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_playlist_keeps_other_tracks() {
    let session = TestSession::start();
    session.add("solo").await;
    session.wait_for_plays(1).await;

    let url = "https://www.youtube.com/playlist?list=PLrm";
    session.resolver.playlist(url, &["p1", "p2"]);
    session.control.add_playlist(url).await.unwrap();
    session.add("after").await;

    let reply = session
        .control
        .execute(ControlRequest::RemovePlaylist)
        .await
        .unwrap();
    assert_eq!(reply.message, "Removed 2 playlist tracks");
    assert_eq!(reply.snapshot.queue, vec!["after"]);
    assert!(!session.path_for("p1").exists());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_previous_replays_prior_track() {
    let session = TestSession::start();
    session.add("earlier").await;
    session.wait_for_plays(1).await;
    session.add("later").await;

    session.control.execute(ControlRequest::Skip).await.unwrap();
    session.wait_for_current(Some("later")).await;

    let message = session.control.previous().await.unwrap();
    assert_eq!(message, "Replaying earlier");
    session.wait_for_current(Some("earlier")).await;
    assert_eq!(session.sink.last_play().unwrap().path, session.path_for("earlier"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_previous_without_history() {
    let session = TestSession::start();
    assert_eq!(session.control.previous().await.unwrap(), "No previous track");
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_channel_fails() {
    let session = TestSession::start();
    let err = session
        .control
        .execute(ControlRequest::Join(Some("basement".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotInVoiceChannel(_)));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_channel_while_playing_keeps_playing() {
    let session = TestSession::start();
    session.add("undisturbed").await;
    session.wait_for_plays(1).await;

    sleep(Duration::from_secs(10)).await;
    let err = session
        .control
        .execute(ControlRequest::Join(Some("basement".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotInVoiceChannel(_)));

    assert!(session.sink.is_streaming());
    assert_eq!(session.sink.connected_to().as_deref(), Some(DEFAULT_CHANNEL));
    let play = session.sink.last_play().unwrap();
    assert!(approx(play.options.start_offset, 10.0, 0.2));

    let snapshot = session.control.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, EnginePhase::Playing);
    assert!(!snapshot.paused);
    assert_eq!(snapshot.current.as_deref(), Some("undisturbed"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_switching_channel_keeps_position() {
    let session = TestSession::start();
    session.add("mobile").await;
    session.wait_for_plays(1).await;

    sleep(Duration::from_secs(12)).await;
    let reply = session
        .control
        .execute(ControlRequest::Join(Some("lounge".to_string())))
        .await
        .unwrap();
    assert_eq!(reply.message, "Joined Lounge");
    assert_eq!(session.sink.connected_to().as_deref(), Some("lounge"));

    let play = session.sink.last_play().unwrap();
    assert!(approx(play.options.start_offset, 12.0, 0.2));
    assert_eq!(reply.snapshot.current.as_deref(), Some("mobile"));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leave_when_not_connected() {
    let session = TestSession::start();
    let err = session
        .control
        .execute(ControlRequest::Leave)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotInVoiceChannel(_)));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leave_stops_playback() {
    let session = TestSession::start();
    session.add("farewell").await;
    session.wait_for_plays(1).await;

    let reply = session.control.execute(ControlRequest::Leave).await.unwrap();
    assert_eq!(reply.message, "Left Default");
    assert!(!reply.snapshot.connected);
    assert_eq!(reply.snapshot.current, None);
    assert_eq!(session.sink.connected_to(), None);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_submit_runs_add_in_background() {
    let session = TestSession::start();

    let reply = session
        .control
        .submit(ControlRequest::Add("background".to_string()))
        .await
        .unwrap();
    assert_eq!(reply.message, "Accepted: background");
    assert!(reply.snapshot.downloads.contains_key("background"));

    session.wait_for_current(Some("background")).await;
    for _ in 0..100 {
        if session.control.snapshot().await.unwrap().downloads.is_empty() {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(session.control.snapshot().await.unwrap().downloads.is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_referenced_files_cover_queue_and_current() {
    let session = TestSession::start();
    session.add("r1").await;
    session.wait_for_plays(1).await;
    session.add("r2").await;

    let files = session.control.referenced_files().await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.contains(&session.path_for("r1")));
    assert!(files.contains(&session.path_for("r2")));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects() {
    let session = TestSession::start();
    session.add("last call").await;
    session.wait_for_plays(1).await;

    let sink = session.sink.clone();
    session.shutdown().await;
    wait_for("disconnect", || sink.connected_to().is_none()).await;
    assert!(!sink.is_streaming());
}
