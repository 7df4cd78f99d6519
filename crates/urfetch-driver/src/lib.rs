//! # urfetch-driver — The Driver Loop
//!
//! The only control flow in urfetch. On one thread:
//!
//! ```text
//! for each session: open handle, register (phase = Connecting)
//! for each session: submit connect
//! while open sessions > 0 {
//!     1. wait_one()                      → (session id, result)
//!     2. registry.phase(id)              → phase
//!     3. next_step(phase, result)        → action + next phase, or fatal
//!     4. apply: append / set phase / close
//!     5. submit the action's operation for *this* session, if any
//! }
//! ```
//!
//! Each session has at most one operation in flight, so the number of open
//! sessions always equals the reactor's in-flight count. The loop ends when
//! the last session sees its zero-length receive.
//!
//! The driver is generic over [`CompletionReactor`]; the same loop runs on
//! io_uring in production and on the scripted `SimReactor` in tests.

use urfetch_core::config::{Endpoint, FetchConfig};
use urfetch_core::entry::{Completion, SessionId};
use urfetch_core::error::{FetchError, Result};
use urfetch_core::phase::{next_step, Action};
use urfetch_core::reactor::CompletionReactor;
use urfetch_core::session::SessionRegistry;
use urfetch_core::{kdebug, kinfo, ktrace};

/// What a finished run hands to the output sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Accumulated bytes per session, indexed by session id.
    pub outputs: Vec<Vec<u8>>,
    /// Completions observed by the loop.
    pub completions: u64,
    pub bytes_received: u64,
}

impl FetchReport {
    /// Sessions that produced at least one byte.
    pub fn non_empty(&self) -> usize {
        self.outputs.iter().filter(|o| !o.is_empty()).count()
    }
}

pub struct Driver<'a, R: CompletionReactor> {
    // Field order matters: the reactor drops (and drains) before the
    // registry frees the buffers in-flight operations may point into.
    reactor: R,
    registry: SessionRegistry<R::Handle>,
    endpoint: Endpoint,
    request: &'a [u8],
    sessions: usize,
    buffer_size: usize,
    started: bool,
    completions: u64,
    bytes_received: u64,
}

impl<'a, R: CompletionReactor> Driver<'a, R> {
    /// Bind `reactor` to the sessions, endpoint and request of `config`.
    ///
    /// The request is borrowed for the driver's lifetime; every send points
    /// into it.
    pub fn new(reactor: R, config: &'a FetchConfig) -> Result<Self> {
        config.validate()?;
        if reactor.capacity() < config.sessions {
            return Err(FetchError::Config(format!(
                "reactor holds {} operations, {} sessions requested",
                reactor.capacity(),
                config.sessions
            )));
        }
        Ok(Self {
            reactor,
            registry: SessionRegistry::with_capacity(config.sessions),
            endpoint: config.endpoint,
            request: &config.request,
            sessions: config.sessions,
            buffer_size: config.buffer_size,
            started: false,
            completions: 0,
            bytes_received: 0,
        })
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn registry(&self) -> &SessionRegistry<R::Handle> {
        &self.registry
    }

    /// Create every session, then queue every connect.
    fn start(&mut self) -> Result<()> {
        for _ in 0..self.sessions {
            let handle = self.reactor.open()?;
            self.registry.create(handle, self.buffer_size);
        }
        for idx in 0..self.sessions {
            let id = SessionId::from_index(idx);
            let handle = self.registry.handle(id);
            self.reactor.submit_connect(id, handle, &self.endpoint)?;
        }
        self.started = true;
        kinfo!("urfetch: {} sessions -> {}", self.sessions, self.endpoint);
        Ok(())
    }

    /// Drive every session to `Closed`, or stop at the first fatal completion.
    pub fn run(&mut self) -> Result<()> {
        if !self.started {
            self.start()?;
        }
        while self.registry.open_count() > 0 {
            debug_assert_eq!(self.registry.open_count(), self.reactor.inflight());
            let completion = self.reactor.wait_one()?;
            self.on_completion(completion)?;
        }
        kinfo!(
            "urfetch: {} sessions closed, {} completions, {} bytes",
            self.sessions,
            self.completions,
            self.bytes_received
        );
        Ok(())
    }

    fn on_completion(&mut self, c: Completion) -> Result<()> {
        self.completions += 1;
        let id = c.session;
        let phase = self.registry.phase(id);
        let step = next_step(phase, c.result, self.request.len())
            .map_err(|violation| FetchError::Protocol { session: id, violation })?;
        ktrace!("session {}: {:?} --{}--> {:?}", id, phase, c.result, step.next);

        match step.action {
            Action::Send => {
                self.registry.set_phase(id, step.next);
                let handle = self.registry.handle(id);
                // Safety: `request` is borrowed for 'a, which outlives the
                // driver and therefore every operation it submits.
                unsafe { self.reactor.submit_send(id, handle, self.request)? };
            }
            Action::Receive { append } => {
                if append > 0 {
                    self.registry.append_received(id, append);
                    self.bytes_received += append as u64;
                }
                self.registry.set_phase(id, step.next);
                let (handle, buf) = self.registry.recv_parts(id);
                // Safety: the buffer is a boxed slice owned by the session. It
                // does not move, and the driver only touches it again after
                // this receive's completion has been returned.
                unsafe { self.reactor.submit_receive(id, handle, buf)? };
            }
            Action::Close => {
                self.registry.close(id);
                kdebug!(
                    "session {} closed with {} bytes, {} still open",
                    id,
                    self.registry.output(id).len(),
                    self.registry.open_count()
                );
            }
        }
        Ok(())
    }

    /// Consume the driver, yielding each session's output.
    pub fn finish(self) -> FetchReport {
        let Driver { reactor, registry, completions, bytes_received, .. } = self;
        drop(reactor);
        FetchReport {
            outputs: registry.into_outputs(),
            completions,
            bytes_received,
        }
    }
}

/// Run `config` to completion on `reactor`.
pub fn fetch<R: CompletionReactor>(reactor: R, config: &FetchConfig) -> Result<FetchReport> {
    let mut driver = Driver::new(reactor, config)?;
    driver.run()?;
    Ok(driver.finish())
}

/// Run `config` on a fresh io_uring sized to the session count.
#[cfg(target_os = "linux")]
pub fn fetch_with_uring(config: &FetchConfig) -> Result<FetchReport> {
    let reactor = urfetch_module::IoUringReactor::new(config.sessions)?;
    fetch(reactor, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    use urfetch_core::error::Violation;
    use urfetch_core::session::Phase;
    use urfetch_module::output_sink;
    use urfetch_module::sim_reactor::{Interleave, PeerScript, SimReactor};

    fn config(n: usize) -> FetchConfig {
        FetchConfig::new()
            .sessions(n)
            .endpoint("10.0.0.1:80".parse().unwrap())
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn every_session_closes_exactly_once() {
        for n in [1, 2, 3, 7, 16, 64] {
            for interleave in [Interleave::Fifo, Interleave::Lifo, Interleave::Seeded(n as u64)] {
                let cfg = config(n);
                let sim = SimReactor::uniform(n, PeerScript::serve(b"<html/>", &[3]), interleave);
                let mut driver = Driver::new(sim, &cfg).unwrap();
                driver.run().unwrap();

                assert_eq!(driver.registry().open_count(), 0);
                assert!(driver.registry().iter().all(|s| s.phase() == Phase::Closed));
                assert_eq!(driver.reactor().inflight(), 0);
                assert_eq!(driver.reactor().refused(), 0);
                assert_eq!(driver.reactor().live_handles(), 0);
                // connect + send + 2 data + eof
                assert_eq!(driver.reactor().delivered().len(), n * 5);

                let report = driver.finish();
                assert_eq!(report.completions, (n * 5) as u64);
                assert!(report.outputs.iter().all(|o| o == b"<html/>"));
            }
        }
    }

    #[test]
    fn output_is_the_exact_byte_sequence_for_any_split() {
        let page = body(5000);
        let splits: [&[usize]; 5] = [&[], &[1], &[1, 1, 1], &[999, 2, 3000], &[1023, 1023, 1023]];
        for split in splits {
            for buffer_size in [1, 7, 1023, 8192] {
                let cfg = config(1).buffer_size(buffer_size);
                let sim = SimReactor::uniform(1, PeerScript::serve(&page, split), Interleave::Fifo);
                let report = fetch(sim, &cfg).unwrap();
                assert_eq!(report.outputs[0], page, "split {:?} buffer {}", split, buffer_size);
                assert_eq!(report.bytes_received, page.len() as u64);
            }
        }
    }

    #[test]
    fn immediate_eof_closes_with_no_output_and_no_file() {
        let cfg = config(1);
        let sim = SimReactor::uniform(1, PeerScript::new().eof(), Interleave::Fifo);
        let mut driver = Driver::new(sim, &cfg).unwrap();
        driver.run().unwrap();
        assert_eq!(driver.registry().phase(SessionId(0)), Phase::Closed);
        assert_eq!(driver.reactor().live_handles(), 0);

        let report = driver.finish();
        assert!(report.outputs[0].is_empty());
        assert_eq!(report.non_empty(), 0);

        let dir = std::env::temp_dir().join(format!("urfetch-driver-eof-{}", std::process::id()));
        output_sink::prepare(&dir).unwrap();
        assert_eq!(output_sink::write_outputs(&dir, None, &report.outputs).unwrap(), 0);
        assert!(!dir.join("0").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn three_session_scripts() -> Vec<PeerScript> {
        let first = body(800);
        vec![
            PeerScript::new().data(&first[..500]).data(&first[500..]).eof(),
            PeerScript::new().eof(),
            PeerScript::new().recv_error(1),
        ]
    }

    #[test]
    fn receive_error_aborts_the_whole_run() {
        let cfg = config(3);
        for interleave in [
            Interleave::Fifo,
            Interleave::Lifo,
            Interleave::Seeded(1),
            Interleave::Seeded(7),
            Interleave::Seeded(1234),
        ] {
            let sim = SimReactor::new(three_session_scripts(), interleave);
            let err = fetch(sim, &cfg).unwrap_err();
            match err {
                FetchError::Protocol { session, violation } => {
                    assert_eq!(session, SessionId(2));
                    assert_eq!(violation, Violation::ReceiveFailed(-1));
                }
                other => panic!("{:?}: unexpected {:?}", interleave, other),
            }
        }
    }

    #[test]
    fn healthy_sessions_of_the_scenario_produce_their_files() {
        // Sessions 0 and 1 of the three-session scenario, without session 2.
        let mut scripts = three_session_scripts();
        scripts.truncate(2);
        let cfg = config(2);
        let sim = SimReactor::new(scripts, Interleave::Fifo);
        let mut driver = Driver::new(sim, &cfg).unwrap();
        driver.run().unwrap();

        let per_session = |s: usize| -> Vec<i64> {
            driver
                .reactor()
                .delivered()
                .iter()
                .filter(|c| c.session.index() == s)
                .map(|c| c.result)
                .collect()
        };
        let req = cfg.request.len() as i64;
        assert_eq!(per_session(0), vec![0, req, 500, 300, 0]);
        assert_eq!(per_session(1), vec![0, req, 0]);

        let report = driver.finish();
        assert_eq!(report.outputs[0], body(800));
        assert!(report.outputs[1].is_empty());

        let dir = std::env::temp_dir().join(format!("urfetch-driver-n3-{}", std::process::id()));
        output_sink::prepare(&dir).unwrap();
        assert_eq!(output_sink::write_outputs(&dir, None, &report.outputs).unwrap(), 1);
        assert_eq!(std::fs::read(dir.join("0")).unwrap(), body(800));
        assert!(!dir.join("1").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn outputs_do_not_depend_on_interleaving() {
        let n = 12;
        let scripts: Vec<_> = (0..n)
            .map(|i| {
                let page = body(100 * i + 1);
                PeerScript::serve(&page, &[i + 1, 2 * i + 3])
            })
            .collect();
        let cfg = config(n).buffer_size(64);
        let baseline = fetch(SimReactor::new(scripts.clone(), Interleave::Fifo), &cfg).unwrap();
        for seed in 1..40 {
            let report = fetch(SimReactor::new(scripts.clone(), Interleave::Seeded(seed)), &cfg).unwrap();
            assert_eq!(report.outputs, baseline.outputs, "seed {}", seed);
        }
        let report = fetch(SimReactor::new(scripts, Interleave::Lifo), &cfg).unwrap();
        assert_eq!(report.outputs, baseline.outputs);
    }

    #[test]
    fn connect_failure_is_fatal() {
        let cfg = config(2);
        let scripts = vec![PeerScript::serve(b"ok", &[]), PeerScript::new().connect_result(-111)];
        let err = fetch(SimReactor::new(scripts, Interleave::Fifo), &cfg).unwrap_err();
        assert!(matches!(
            err,
            FetchError::Protocol { session: SessionId(1), violation: Violation::ConnectFailed(-111) }
        ));
    }

    #[test]
    fn short_send_is_fatal() {
        let cfg = config(1);
        let sim = SimReactor::uniform(1, PeerScript::new().send_result(4), Interleave::Fifo);
        let err = fetch(sim, &cfg).unwrap_err();
        assert!(matches!(
            err,
            FetchError::Protocol { violation: Violation::ShortSend { sent: 4, expected: 18 }, .. }
        ));
    }

    #[test]
    fn reactor_smaller_than_session_count_is_rejected() {
        let cfg = config(4);
        let sim = SimReactor::uniform(2, PeerScript::new(), Interleave::Fifo);
        assert!(matches!(Driver::new(sim, &cfg), Err(FetchError::Config(_))));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_io() {
        let cfg = config(1).request(Vec::new());
        let sim = SimReactor::uniform(1, PeerScript::new(), Interleave::Fifo);
        assert!(matches!(Driver::new(sim, &cfg), Err(FetchError::Config(_))));
    }
}
