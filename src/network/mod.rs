//! TCP transport: connection acceptor, client handles, producer client

pub mod acceptor;
pub mod client;
pub mod stream;

pub use acceptor::{AcceptOutcome, Acceptor};
pub use client::MixerClient;
pub use stream::ClientStream;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{AudioSink, MemorySink, SinkFormat};
    use crate::config::NetworkConfig;
    use crate::mixer::{MixerState, MixingEngine};
    use std::net::{IpAddr, Ipv4Addr, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const PERIOD: usize = 256;

    #[test]
    fn test_end_to_end_over_loopback() {
        let config = NetworkConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            max_clients: 8,
            accept_retry_ms: 10,
        };
        let acceptor = Acceptor::bind(&config).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let state: Arc<MixerState<TcpStream>> = Arc::new(MixerState::new(8));
        let mut sink = MemorySink::new();
        let period = sink
            .configure(&SinkFormat {
                sample_rate: 44100,
                channels: 1,
                buffer_frames: 4096,
                period_frames: Some(PERIOD as u32),
            })
            .unwrap();

        let engine = MixingEngine::new(state.clone(), sink.clone(), period, 1);
        thread::spawn(move || engine.run());
        let acceptor_state = state.clone();
        thread::spawn(move || acceptor.run(acceptor_state));

        let mut client = MixerClient::connect(addr).unwrap();
        for _ in 0..4 {
            client.send_chunk(1.0, &[1200; PERIOD]).unwrap();
        }
        client.finish().unwrap();

        // the faded-out final period is written after the eviction is recorded
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.period_count() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let stats = state.stats().snapshot();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.evicted, 1);

        let periods = sink.periods();
        assert_eq!(periods.len(), 5);
        // START fades in from an empty lagged buffer, then full-level playback
        assert!(periods[0].iter().all(|&s| s == 0));
        assert!(periods[2].iter().all(|&s| s == 1200));
        // final buffer is faded out
        assert_eq!(periods[4][0], 1200);
        assert_eq!(periods[4][PERIOD - 1], 0);
    }
}
