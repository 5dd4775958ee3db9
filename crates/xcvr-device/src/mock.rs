//! Mock transport backed by a simulated transceiver.
//!
//! The simulated device parses real request frames, applies them to an
//! in-memory model (mode, bus routing, per-lane transmit queues) and
//! answers with real response frames. Faults can be scripted per request.
//! All tests use this instead of hardware so the suite runs anywhere.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use xcvr_protocol::{
    BusSelector, DeviceInfo, FaultFlags, Frame, HardwareType, HealthSnapshot, LANE_COUNT, Opcode,
    Permission, RECORD_LEN, ReceivedFrame, Request, Response, SafetyMode, Status, decode_record,
    is_supported_bitrate, is_tx_request,
};

use crate::transport::{Connector, Transport, TransportError, TransportResult};

/// Most records returned by one `ReceiveFrames` reply.
const RX_BATCH: usize = 15;

/// A fault applied to the response of the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Execute the command but lose the response.
    DropResponse,
    /// Reply with these bytes instead of a response frame.
    Garbage(Vec<u8>),
    /// Send only the first `n` bytes of the response.
    Truncate(usize),
    /// Emit a response with the previous sequence number first.
    StaleFirst,
    /// Skip execution and answer with this status.
    Status(Status),
}

/// How the simulated firmware refuses an unsupported mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Veto {
    /// Answer `Rejected`.
    Status,
    /// Answer `Ok` but stay in the previous mode.
    Silent,
}

/// In-memory model of the transceiver firmware.
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub mode: SafetyMode,
    pub bus: BusSelector,
    pub queues: [VecDeque<Frame>; LANE_COUNT as usize],
    pub rx: VecDeque<ReceivedFrame>,
    pub bitrates_kbps: [u16; LANE_COUNT as usize],
    pub tx_frames: u32,
    pub rx_frames: u32,
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub uptime_secs: u32,
    pub faults: FaultFlags,
    pub ignition: bool,
    pub controls_allowed: bool,
    pub vetoed: Vec<(SafetyMode, Veto)>,
    pub gmlan_lanes: Vec<u8>,
    pub info: DeviceInfo,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self {
            mode: SafetyMode::NoOutput,
            bus: BusSelector::can(),
            queues: Default::default(),
            rx: VecDeque::new(),
            bitrates_kbps: [500; LANE_COUNT as usize],
            tx_frames: 0,
            rx_frames: 0,
            voltage_mv: 12_100,
            current_ma: 180,
            uptime_secs: 42,
            faults: FaultFlags::default(),
            ignition: false,
            controls_allowed: false,
            vetoed: Vec::new(),
            gmlan_lanes: vec![1, 2],
            info: DeviceInfo {
                firmware_version: "1.4.0".into(),
                hardware: HardwareType::Black,
                serial: "SIM0001".into(),
            },
        }
    }
}

impl SimDevice {
    fn snapshot(&self) -> HealthSnapshot {
        let mut tx_pending = [0u16; LANE_COUNT as usize];
        for (lane, queue) in self.queues.iter().enumerate() {
            tx_pending[lane] = queue.len() as u16;
        }
        HealthSnapshot {
            safety_mode: self.mode,
            bus_selector: self.bus,
            voltage_mv: self.voltage_mv,
            current_ma: self.current_ma,
            uptime_secs: self.uptime_secs,
            tx_frames: self.tx_frames,
            rx_frames: self.rx_frames,
            faults: self.faults,
            ignition: self.ignition,
            controls_allowed: self.controls_allowed,
            tx_pending,
            captured_at: chrono::Utc::now(),
        }
    }

    fn allows(&self, permission: Permission) -> bool {
        self.mode.permissions().allows(permission)
    }

    fn lane(params: &[u8]) -> Option<usize> {
        match params {
            [bus] if *bus < LANE_COUNT => Some(*bus as usize),
            _ => None,
        }
    }

    /// Execute one request the way the firmware would.
    pub fn handle(&mut self, req: &Request) -> Response {
        let (status, result) = self.execute(req);
        Response::new(req.opcode, req.seq, status, result)
    }

    fn execute(&mut self, req: &Request) -> (Status, Vec<u8>) {
        let params = req.params.as_slice();
        match req.opcode {
            Opcode::SetSafetyMode => {
                let [lo, hi] = params else {
                    return (Status::InvalidParameter, vec![]);
                };
                let target = SafetyMode::from_code(u16::from_le_bytes([*lo, *hi]));
                if matches!(target, SafetyMode::Other(_)) {
                    return (Status::InvalidParameter, vec![]);
                }
                match self.vetoed.iter().find(|(m, _)| *m == target) {
                    Some((_, Veto::Status)) => (Status::Rejected, vec![]),
                    Some((_, Veto::Silent)) => (Status::Ok, vec![]),
                    None => {
                        if self.mode != target {
                            self.controls_allowed = false;
                        }
                        self.mode = target;
                        (Status::Ok, vec![])
                    }
                }
            }
            Opcode::SetBusSelector => {
                let Ok(selector) = BusSelector::from_params(params) else {
                    return (Status::InvalidParameter, vec![]);
                };
                if !self.allows(Permission::ChangeBus) {
                    return (Status::Refused, vec![]);
                }
                let supported = match selector.lane() {
                    None => selector.variant == 0,
                    Some(lane) => self.gmlan_lanes.contains(&lane),
                };
                if !supported {
                    return (Status::UnsupportedVariant, vec![]);
                }
                self.bus = selector;
                (Status::Ok, vec![])
            }
            Opcode::ClearQueue => {
                let Some(lane) = Self::lane(params) else {
                    return (Status::InvalidParameter, vec![]);
                };
                if !self.allows(Permission::ClearQueue) {
                    return (Status::Refused, vec![]);
                }
                self.queues[lane].clear();
                (Status::Ok, vec![])
            }
            Opcode::SendFrame => {
                if params.len() != RECORD_LEN || !is_tx_request(params) {
                    return (Status::InvalidParameter, vec![]);
                }
                let Ok(record) = decode_record(params) else {
                    return (Status::InvalidParameter, vec![]);
                };
                if !self.allows(Permission::Transmit) {
                    return (Status::Refused, vec![]);
                }
                let lane = record.frame.bus as usize;
                self.queues[lane].push_back(record.frame);
                (Status::Ok, vec![])
            }
            Opcode::QueryHealth => (Status::Ok, self.snapshot().encode().to_vec()),
            Opcode::QueryVersion => (Status::Ok, self.info.encode()),
            Opcode::SetBitrate => {
                let [bus, lo, hi] = params else {
                    return (Status::InvalidParameter, vec![]);
                };
                let kbps = u16::from_le_bytes([*lo, *hi]) / 10;
                if *bus >= LANE_COUNT || !is_supported_bitrate(kbps) {
                    return (Status::InvalidParameter, vec![]);
                }
                if !self.allows(Permission::ChangeBus) {
                    return (Status::Refused, vec![]);
                }
                self.bitrates_kbps[*bus as usize] = kbps;
                (Status::Ok, vec![])
            }
            Opcode::ReceiveFrames => {
                let n = self.rx.len().min(RX_BATCH);
                let mut out = Vec::with_capacity(n * RECORD_LEN);
                for frame in self.rx.drain(..n) {
                    out.extend_from_slice(&frame.to_record());
                }
                (Status::Ok, out)
            }
        }
    }

    /// Let every pending frame on `bus` leave the transceiver.
    pub fn transmit_pending(&mut self, bus: u8) -> usize {
        let sent: Vec<Frame> = self.queues[bus as usize].drain(..).collect();
        self.tx_frames += sent.len() as u32;
        for frame in &sent {
            self.rx.push_back(ReceivedFrame {
                frame: frame.clone(),
                returned: true,
            });
        }
        sent.len()
    }
}

#[derive(Default)]
struct Shared {
    device: SimDevice,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    faults: VecDeque<Fault>,
    requests: Vec<Request>,
    writes: usize,
    read_delay: Option<Duration>,
    /// Last answer given, replayed when the same request is retransmitted.
    last_reply: Option<Response>,
    disconnected: bool,
    closed: bool,
}

impl Shared {
    fn process_inbound(&mut self) {
        loop {
            match Request::decode(&self.inbound) {
                Ok(Some((req, used))) => {
                    self.inbound.drain(..used);
                    self.respond(&req);
                    self.requests.push(req);
                }
                Ok(None) => break,
                Err(_) => {
                    self.inbound.clear();
                    break;
                }
            }
        }
    }

    fn respond(&mut self, req: &Request) {
        let fault = self.faults.pop_front();
        let response = match (&fault, &self.last_reply) {
            (Some(Fault::Status(status)), _) => {
                Response::new(req.opcode, req.seq, *status, vec![])
            }
            // Retransmission: same opcode and sequence number as the last
            // request. Answer again without executing it twice.
            (_, Some(last)) if last.opcode == req.opcode && last.seq == req.seq => last.clone(),
            _ => self.device.handle(req),
        };
        self.last_reply = Some(response.clone());
        let encoded = match response.encode() {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        match fault {
            Some(Fault::DropResponse) => {}
            Some(Fault::Garbage(bytes)) => self.outbound.extend(bytes),
            Some(Fault::Truncate(n)) => self.outbound.extend(encoded.into_iter().take(n)),
            Some(Fault::StaleFirst) => {
                let stale = Response::ok(Opcode::ClearQueue, req.seq.wrapping_sub(1));
                if let Ok(bytes) = stale.encode() {
                    self.outbound.extend(bytes);
                }
                self.outbound.extend(encoded);
            }
            Some(Fault::Status(_)) | None => self.outbound.extend(encoded),
        }
    }
}

/// Mock transport. Clones share the same simulated device.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// A device in `NoOutput` with plain CAN routing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that reports `mode` at session start.
    pub fn with_mode(mode: SafetyMode) -> Self {
        let mock = Self::new();
        mock.shared.lock().unwrap().device.mode = mode;
        mock
    }

    /// Queue a fault for the next unanswered request.
    pub fn inject(&self, fault: Fault) {
        self.shared.lock().unwrap().faults.push_back(fault);
    }

    /// Make the firmware refuse `mode`.
    pub fn veto_mode(&self, mode: SafetyMode, veto: Veto) {
        self.shared.lock().unwrap().device.vetoed.push((mode, veto));
    }

    /// Delay every read, to hold an exchange in flight.
    pub fn set_read_delay(&self, delay: Duration) {
        self.shared.lock().unwrap().read_delay = Some(delay);
    }

    /// Simulate the device dropping off the bus.
    pub fn disconnect(&self) {
        self.shared.lock().unwrap().disconnected = true;
    }

    /// Run `f` against the simulated device.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        f(&mut self.shared.lock().unwrap().device)
    }

    pub fn mode(&self) -> SafetyMode {
        self.with_device(|d| d.mode)
    }

    pub fn bus(&self) -> BusSelector {
        self.with_device(|d| d.bus)
    }

    /// Frames waiting on `bus`, oldest first.
    pub fn queued(&self, bus: u8) -> Vec<Frame> {
        self.with_device(|d| d.queues[bus as usize].iter().cloned().collect())
    }

    /// Successful `write` calls so far.
    pub fn writes(&self) -> usize {
        self.shared.lock().unwrap().writes
    }

    /// Every request the device decoded, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.shared.lock().unwrap().requests.clone()
    }

    /// Requests carrying `opcode`.
    pub fn requests_for(&self, opcode: Opcode) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.opcode == opcode)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().unwrap().closed
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.disconnected || shared.closed {
            return Err(TransportError::Disconnected);
        }
        shared.writes += 1;
        shared.inbound.extend_from_slice(bytes);
        shared.process_inbound();
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> TransportResult<Vec<u8>> {
        let delay = self.shared.lock().unwrap().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.shared.lock().unwrap();
        if shared.disconnected {
            return Err(TransportError::Disconnected);
        }
        if shared.outbound.is_empty() {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let n = shared.outbound.len().min(max_bytes);
        Ok(shared.outbound.drain(..n).collect())
    }

    async fn close(&mut self) -> TransportResult<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.closed = true;
        shared.last_reply = None;
        Ok(())
    }
}

/// Connector handing out clones of one `MockTransport`.
#[derive(Clone, Default)]
pub struct MockConnector {
    transport: MockTransport,
    refuse: bool,
}

impl MockConnector {
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            refuse: false,
        }
    }

    /// A connector whose `open` always fails.
    pub fn refusing() -> Self {
        Self {
            transport: MockTransport::new(),
            refuse: true,
        }
    }

    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> TransportResult<Box<dyn Transport>> {
        if self.refuse {
            return Err(TransportError::Io("no device attached".into()));
        }
        Ok(Box::new(self.transport.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcvr_protocol::{CanId, ResponseBuffer};

    async fn exchange(mock: &mut MockTransport, req: Request) -> Response {
        mock.write(&req.encode().unwrap()).await.unwrap();
        let bytes = mock.read(512, Duration::from_millis(10)).await.unwrap();
        let mut buf = ResponseBuffer::new();
        buf.extend(&bytes);
        buf.next_response().unwrap().unwrap()
    }

    #[tokio::test]
    async fn health_reflects_model() {
        let mut mock = MockTransport::with_mode(SafetyMode::Silent);
        let resp = exchange(&mut mock, Request::new(Opcode::QueryHealth, 1, vec![])).await;
        let snap = HealthSnapshot::decode(&resp.result, chrono::Utc::now()).unwrap();
        assert_eq!(snap.safety_mode, SafetyMode::Silent);
        assert_eq!(snap.bus_selector, BusSelector::can());
    }

    #[tokio::test]
    async fn firmware_refuses_frames_when_not_armed() {
        let mut mock = MockTransport::new();
        let frame = Frame::new(CanId::Standard(0x123), &[1], 0).unwrap();
        let req = Request::new(Opcode::SendFrame, 1, frame.to_record().to_vec());
        let resp = exchange(&mut mock, req).await;
        assert_eq!(resp.status, Status::Refused);
        assert!(mock.queued(0).is_empty());
    }

    #[tokio::test]
    async fn vetoed_mode_is_rejected() {
        let mut mock = MockTransport::new();
        mock.veto_mode(SafetyMode::Toyota, Veto::Status);
        let req = Request::new(
            Opcode::SetSafetyMode,
            1,
            SafetyMode::Toyota.code().to_le_bytes().to_vec(),
        );
        let resp = exchange(&mut mock, req).await;
        assert_eq!(resp.status, Status::Rejected);
        assert_eq!(mock.mode(), SafetyMode::NoOutput);
    }

    #[tokio::test]
    async fn transmit_pending_echoes_frames() {
        let mock = MockTransport::with_mode(SafetyMode::Gm);
        let frame = Frame::new(CanId::Standard(0x1A0), &[9], 1).unwrap();
        mock.with_device(|d| d.queues[1].push_back(frame.clone()));

        assert_eq!(mock.with_device(|d| d.transmit_pending(1)), 1);
        assert!(mock.queued(1).is_empty());
        let rx = mock.with_device(|d| d.rx.clone());
        assert_eq!(rx.len(), 1);
        assert!(rx[0].returned);
    }

    #[tokio::test]
    async fn retransmitted_frame_is_queued_once() {
        let mut mock = MockTransport::with_mode(SafetyMode::Gm);
        let frame = Frame::new(CanId::Standard(0x123), &[1], 1).unwrap();
        let req = Request::new(Opcode::SendFrame, 7, frame.to_record().to_vec());

        let first = exchange(&mut mock, req.clone()).await;
        let again = exchange(&mut mock, req.clone()).await;
        assert_eq!(first, again);
        assert_eq!(mock.queued(1), vec![frame.clone()]);

        // A new sequence number is a new command.
        let next = Request::new(Opcode::SendFrame, 8, frame.to_record().to_vec());
        exchange(&mut mock, next).await;
        assert_eq!(mock.queued(1).len(), 2);
    }

    #[tokio::test]
    async fn empty_outbound_times_out() {
        let mut mock = MockTransport::new();
        let result = mock.read(16, Duration::from_millis(100)).await;
        assert!(matches!(
            result,
            Err(TransportError::Timeout { timeout_ms: 100 })
        ));
    }

    #[tokio::test]
    async fn refusing_connector() {
        let connector = MockConnector::refusing();
        assert!(connector.open().await.is_err());
    }
}
