use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use sysvc::{
    Lifecycle, ServiceConfig, ServiceError,
    bridge::{ControlBridge, ControlCode, ManagerState, StatusRecord, StatusReporter},
    lifecycle::LifecycleState,
};

fn counting_config(name: &str, stops: &Arc<AtomicUsize>) -> ServiceConfig {
    let counter = Arc::clone(stops);
    ServiceConfig::builder(name)
        .on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap()
}

#[test]
fn racing_stop_and_start_never_lose_the_stop() {
    for _ in 0..200 {
        let stops = Arc::new(AtomicUsize::new(0));
        let lifecycle = Arc::new(Lifecycle::new(counting_config("race", &stops)));

        let stopper = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || lifecycle.stop())
        };
        let starter = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || lifecycle.start())
        };

        stopper.join().unwrap();
        starter.join().unwrap().unwrap();
        assert!(lifecycle.is_stopped());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn is_stopped_turns_true_only_after_on_stop_returns() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let config = ServiceConfig::builder("slow-stop")
        .on_stop(move || {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            Ok(())
        })
        .build()
        .unwrap();
    let lifecycle = Arc::new(Lifecycle::new(config));

    let worker = {
        let lifecycle = Arc::clone(&lifecycle);
        thread::spawn(move || lifecycle.start())
    };
    assert_eq!(lifecycle.wait_until_running(), LifecycleState::Running);
    assert!(!lifecycle.is_stopped());

    lifecycle.stop();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!lifecycle.is_stopped());
    assert_eq!(lifecycle.state(), LifecycleState::StopRequested);

    release_tx.send(()).unwrap();
    worker.join().unwrap().unwrap();
    assert!(lifecycle.is_stopped());
}

#[derive(Default)]
struct Recorder {
    reports: Arc<Mutex<Vec<StatusRecord>>>,
}

impl StatusReporter for Recorder {
    fn report(&self, status: &StatusRecord) -> Result<(), ServiceError> {
        self.reports.lock().unwrap().push(status.clone());
        Ok(())
    }
}

#[test]
fn manager_stop_and_direct_stop_together_run_on_stop_once() {
    let stops = Arc::new(AtomicUsize::new(0));
    let lifecycle = Arc::new(Lifecycle::new(counting_config("both", &stops)));
    let bridge = Arc::new(ControlBridge::new("both", Arc::clone(&lifecycle)));
    let recorder = Recorder::default();
    let reports = Arc::clone(&recorder.reports);
    bridge.attach(Box::new(recorder));

    let dispatch = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || bridge.serve())
    };
    lifecycle.wait_until_running();

    let stoppers: Vec<_> = (0..4)
        .map(|idx| {
            let bridge = Arc::clone(&bridge);
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || {
                if idx % 2 == 0 {
                    bridge.handle_control(ControlCode::Stop);
                } else {
                    lifecycle.stop();
                }
            })
        })
        .collect();
    for stopper in stoppers {
        stopper.join().unwrap();
    }
    dispatch.join().unwrap().unwrap();

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    let reports = reports.lock().unwrap();
    assert_eq!(reports.last().unwrap().state, ManagerState::Stopped);
    assert!(
        reports
            .windows(2)
            .all(|pair| pair[1].checkpoint >= pair[0].checkpoint)
    );
    assert_eq!(reports.last().unwrap().checkpoint, 2);
}

#[test]
fn direct_run_returns_after_stop() {
    let stops = Arc::new(AtomicUsize::new(0));
    let lifecycle = Arc::new(Lifecycle::new(counting_config("direct", &stops)));

    let runner = {
        let lifecycle = Arc::clone(&lifecycle);
        thread::spawn(move || sysvc::bridge::direct(lifecycle.as_ref()))
    };
    lifecycle.wait_until_running();
    lifecycle.stop();
    runner.join().unwrap().unwrap();

    assert_eq!(stops.load(Ordering::SeqCst), 1);
}
