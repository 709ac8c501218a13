//! OSC receive loop and message dispatch
//!
//! One task owns the socket, the mapping engine, and the Firmata client:
//! datagrams are decoded, dispatched to the matching handler, and the
//! resulting actuator commands written to the serial link before the next
//! datagram is read. All configuration mutation happens here, on this single
//! task.

use std::collections::VecDeque;
use std::net::SocketAddr;

use oscmata_core::{ActuatorCommand, Config, MappingEngine, Result, STEPPER_DUTY_CYCLE};
use oscmata_hardware::{FirmataClient, PinMode, SerialTransport};
use rosc::{decoder, OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// OSC address routed to the note handler
pub const OSC_NOTE_ADDR: &str = "/note";
/// OSC address routed to the control-change handler
pub const OSC_CC_ADDR: &str = "/cc";

/// The bridge: mapping engine plus Firmata client.
pub struct BridgeServer<T: SerialTransport + ?Sized = dyn SerialTransport> {
    engine: MappingEngine,
    client: FirmataClient<T>,
}

impl<T: SerialTransport + ?Sized> BridgeServer<T> {
    pub fn new(engine: MappingEngine, client: FirmataClient<T>) -> Self {
        Self { engine, client }
    }

    /// The engine, for the shutdown flush.
    pub fn engine(&self) -> &MappingEngine {
        &self.engine
    }

    /// Blocking receive-dispatch loop. Runs until cancelled by the caller's
    /// shutdown select; steady-state failures are logged and never abort
    /// the loop.
    pub async fn run(&mut self, socket: &UdpSocket) {
        let mut buf = [0u8; decoder::MTU];

        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    continue;
                }
            };
            self.handle_datagram(&buf[..len], peer).await;
        }
    }

    /// Decode one datagram and dispatch its messages.
    pub async fn handle_datagram(&mut self, data: &[u8], peer: SocketAddr) {
        let (_, packet) = match decoder::decode_udp(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Failed to decode OSC datagram from {}: {}", peer, e);
                return;
            }
        };

        // Bundles are flattened in order; nested bundles are rare but legal
        let mut pending = VecDeque::new();
        pending.push_back(packet);
        while let Some(packet) = pending.pop_front() {
            match packet {
                OscPacket::Message(msg) => self.dispatch_message(msg, peer).await,
                OscPacket::Bundle(bundle) => {
                    for inner in bundle.content.into_iter().rev() {
                        pending.push_front(inner);
                    }
                }
            }
        }
    }

    async fn dispatch_message(&mut self, msg: OscMessage, peer: SocketAddr) {
        debug!("OSC message '{}' from {}: {:?}", msg.addr, peer, msg.args);

        match msg.addr.as_str() {
            OSC_NOTE_ADDR => {
                let Some((channel, note, velocity)) = midi_triple(&msg.args) else {
                    warn!("'{}' expects [channel, note, velocity], got {:?}", msg.addr, msg.args);
                    return;
                };
                if let Some(command) = self.engine.apply_note(channel, note, velocity) {
                    self.write_command(command).await;
                }
            }
            OSC_CC_ADDR => {
                let Some((channel, cc_number, cc_value)) = midi_triple(&msg.args) else {
                    warn!("'{}' expects [channel, ccNumber, ccValue], got {:?}", msg.addr, msg.args);
                    return;
                };
                for command in self.engine.apply_control_change(channel, cc_number, cc_value) {
                    self.write_command(command).await;
                }
            }
            // Anything else only gets the debug log above
            _ => {}
        }
    }

    /// Push one command to the board. Write failures during steady state
    /// are logged and swallowed; the next message may still succeed.
    async fn write_command(&mut self, command: ActuatorCommand) {
        if let Err(e) = self.client.apply(command).await {
            warn!("Actuator write failed: {}", e);
        }
    }
}

/// Extract the `[channel, number, value]` triple every MIDI-style OSC
/// message carries. Integer and float payloads are accepted; floats are
/// truncated.
fn midi_triple(args: &[OscType]) -> Option<(i32, i32, i32)> {
    if args.len() != 3 {
        return None;
    }
    let mut values = args.iter().map(|arg| match arg {
        OscType::Int(i) => Some(*i),
        OscType::Long(l) => Some(*l as i32),
        OscType::Float(f) => Some(*f as i32),
        OscType::Double(d) => Some(*d as i32),
        _ => None,
    });
    Some((values.next()??, values.next()??, values.next()??))
}

/// One-time board setup: servo pin configuration, stepper direction and
/// timer bring-up, status LED on. Any failure here is startup-fatal.
pub async fn initialize_board<T: SerialTransport + ?Sized>(
    client: &mut FirmataClient<T>,
    config: &Config,
) -> Result<()> {
    for servo in &config.servo {
        client.servo_config(servo.pwm_pin).await?;
    }

    let stepper = &config.stepper;
    client
        .set_pin_mode(stepper.direction_pin, PinMode::Output)
        .await?;
    client
        .digital_write(stepper.direction_pin, stepper.movement.direction != 0)
        .await?;

    client.timer_initialize().await?;
    client.timer_set_frequency(0).await?;
    client.timer_pwm(stepper.step_pin, STEPPER_DUTY_CYCLE).await?;

    client.set_pin_mode(config.led_pin, PinMode::Output).await?;
    client.digital_write(config.led_pin, true).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rosc::encoder;
    use rosc::{OscBundle, OscTime};
    use std::sync::{Arc, Mutex};

    /// Shared record of every frame a mock transport wrote, kept by the
    /// test while the transport itself is boxed away inside the client.
    #[derive(Clone, Default)]
    struct FrameLog(Arc<Mutex<Vec<Vec<u8>>>>);

    impl FrameLog {
        fn frames(&self) -> Vec<Vec<u8>> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Mock transport recording every frame the client writes
    struct MockTransport {
        log: FrameLog,
    }

    #[async_trait]
    impl SerialTransport for MockTransport {
        async fn send(&mut self, frame: &[u8]) -> oscmata_core::Result<()> {
            self.log.0.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn port_path(&self) -> Option<&str> {
            None
        }
    }

    fn mock_client() -> (FirmataClient<MockTransport>, FrameLog) {
        let log = FrameLog::default();
        let client = FirmataClient::with_transport(Box::new(MockTransport { log: log.clone() }));
        (client, log)
    }

    const TEST_CONFIG: &str = r#"{
        "led_pin": 13,
        "midi_max": 127,
        "midi_min": 0,
        "port": 2346,
        "router_ip": "192.168.1.1",
        "servo": [
            {
                "cc": { "home": 1, "max": 2 },
                "note": 60,
                "pos": { "abs_max": 200, "abs_min": 0, "home": 10, "max": 100 },
                "pwm_pin": 9,
                "reverse_home_direction": false,
                "reverse_max_direction": false,
                "reverse_servo_direction": false
            }
        ],
        "stepper": {
            "cc": { "speed": 20 },
            "direction_pin": 4,
            "move": { "direction": 1, "max_speed": 400, "min_speed": 0 },
            "step_pin": 5
        }
    }"#;

    fn test_server() -> (BridgeServer<MockTransport>, FrameLog) {
        let config = Config::from_json(TEST_CONFIG).unwrap();
        let (client, log) = mock_client();
        (BridgeServer::new(MappingEngine::new(config), client), log)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn message(addr: &str, args: Vec<OscType>) -> Vec<u8> {
        encoder::encode(&OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_note_message_writes_servo_position() {
        let (mut server, log) = test_server();

        let data = message(
            OSC_NOTE_ADDR,
            vec![OscType::Int(0), OscType::Int(60), OscType::Int(127)],
        );
        server.handle_datagram(&data, peer()).await;

        // velocity 127 -> position 100 on pin 9
        assert_eq!(log.frames(), vec![vec![0xE0 | 9, 100, 0]]);
    }

    #[tokio::test]
    async fn test_note_message_no_matching_servo() {
        let (mut server, log) = test_server();

        let data = message(
            OSC_NOTE_ADDR,
            vec![OscType::Int(0), OscType::Int(61), OscType::Int(127)],
        );
        server.handle_datagram(&data, peer()).await;

        assert!(log.frames().is_empty());
    }

    #[tokio::test]
    async fn test_cc_message_recalibrates_and_writes() {
        let (mut server, log) = test_server();

        let data = message(
            OSC_CC_ADDR,
            vec![OscType::Int(0), OscType::Int(1), OscType::Int(127)],
        );
        server.handle_datagram(&data, peer()).await;

        // home recalibrated to abs_max and written out
        assert_eq!(server.engine().config().servo[0].pos.home, 200);
        assert_eq!(log.frames(), vec![vec![0xE0 | 9, 200 & 0x7F, 200 >> 7]]);
    }

    #[tokio::test]
    async fn test_cc_stepper_speed_emits_frequency_and_duty() {
        let (mut server, log) = test_server();

        let data = message(
            OSC_CC_ADDR,
            vec![OscType::Int(0), OscType::Int(20), OscType::Int(127)],
        );
        server.handle_datagram(&data, peer()).await;

        let sent = log.frames();
        assert_eq!(sent.len(), 2);
        // frequency 400 Hz
        assert_eq!(sent[0], vec![0xF0, 0x0B, 0x10, 0x03, 0xF7]);
        // fixed 50% duty on the step pin
        assert_eq!(sent[1], vec![0xF0, 0x0C, 5, 0x7F, 0x03, 0xF7]);
    }

    #[tokio::test]
    async fn test_unknown_address_is_logged_only() {
        let (mut server, log) = test_server();

        let data = message(
            "/list",
            vec![OscType::Int(0), OscType::Int(1), OscType::Int(2)],
        );
        server.handle_datagram(&data, peer()).await;

        assert!(log.frames().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_arity_is_ignored() {
        let (mut server, log) = test_server();

        let data = message(OSC_NOTE_ADDR, vec![OscType::Int(60)]);
        server.handle_datagram(&data, peer()).await;

        assert!(log.frames().is_empty());
    }

    #[tokio::test]
    async fn test_float_args_are_accepted() {
        let (mut server, log) = test_server();

        let data = message(
            OSC_NOTE_ADDR,
            vec![
                OscType::Float(0.0),
                OscType::Float(60.0),
                OscType::Float(127.0),
            ],
        );
        server.handle_datagram(&data, peer()).await;

        assert_eq!(log.frames(), vec![vec![0xE0 | 9, 100, 0]]);
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_ignored() {
        let (mut server, log) = test_server();

        server
            .handle_datagram(&[0xDE, 0xAD, 0xBE, 0xEF], peer())
            .await;

        assert!(log.frames().is_empty());
    }

    #[tokio::test]
    async fn test_bundle_messages_dispatch_in_order() {
        let (mut server, log) = test_server();

        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: 0,
                fractional: 0,
            },
            content: vec![
                OscPacket::Message(OscMessage {
                    addr: OSC_NOTE_ADDR.to_string(),
                    args: vec![OscType::Int(0), OscType::Int(60), OscType::Int(0)],
                }),
                OscPacket::Message(OscMessage {
                    addr: OSC_NOTE_ADDR.to_string(),
                    args: vec![OscType::Int(0), OscType::Int(60), OscType::Int(127)],
                }),
            ],
        });
        let data = encoder::encode(&bundle).unwrap();
        server.handle_datagram(&data, peer()).await;

        // home (10) first, then max (100)
        assert_eq!(
            log.frames(),
            vec![vec![0xE0 | 9, 10, 0], vec![0xE0 | 9, 100, 0]]
        );
    }

    #[tokio::test]
    async fn test_initialize_board_sequence() {
        let config = Config::from_json(TEST_CONFIG).unwrap();
        let (mut client, log) = mock_client();

        initialize_board(&mut client, &config).await.unwrap();

        assert_eq!(
            log.frames(),
            vec![
                // servo config for pin 9
                vec![0xF0, 0x70, 9, 0x20, 0x04, 0x60, 0x12, 0xF7],
                // direction pin output, driven to the configured direction
                vec![0xF4, 4, 0x01],
                vec![0xF5, 4, 1],
                // timer bring-up: init, 0 Hz, 50% duty on the step pin
                vec![0xF0, 0x0A, 0xF7],
                vec![0xF0, 0x0B, 0x00, 0x00, 0xF7],
                vec![0xF0, 0x0C, 5, 0x7F, 0x03, 0xF7],
                // LED on
                vec![0xF4, 13, 0x01],
                vec![0xF5, 13, 1],
            ]
        );
    }
}
