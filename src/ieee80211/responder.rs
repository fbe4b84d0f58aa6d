
use log::trace;

use super::{Frame, MacParameters};

/// Control response (ACK or CTS) owed for a frame addressed to this
/// station, to be sent after SIFS.
///
/// The response NAV covers what remains of the received NAV once the
/// response itself has been sent.
pub fn response_for(params: &MacParameters, frame: &Frame) -> Option<Frame> {
    if frame.receiver != params.address {
        return None;
    }

    let response = if frame.is_rts() {
        let duration = frame.duration.saturating_sub(params.sifs_time + params.cts_duration());
        Frame::cts(frame, duration)
    } else if frame.is_data_or_management() {
        let duration = frame.duration.saturating_sub(params.sifs_time + params.ack_duration());
        Frame::ack(frame, duration)
    } else {
        return None;
    };

    trace!("Responding to {:?} from {:?} with {:?}", frame.kind, frame.transmitter, response.kind);

    Some(response)
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::ieee80211::{Config, MacAddress, PhyMode};

    fn params() -> MacParameters {
        let c = Config {
            address: MacAddress::from_u64(2),
            ..Default::default()
        };
        MacParameters::new(&c, &PhyMode::default())
    }

    #[test]
    fn ack_unicast_data() {
        let p = params();

        let mut d = Frame::data(p.address, MacAddress::from_u64(1), Bytes::from_static(b"abc"));
        d.duration = p.sifs_time + p.ack_duration();

        let ack = response_for(&p, &d).unwrap();
        assert!(ack.is_ack());
        assert_eq!(ack.receiver, MacAddress::from_u64(1));
        assert_eq!(ack.duration, 0);
    }

    #[test]
    fn cts_to_rts() {
        let p = params();

        let d = Frame::data(p.address, MacAddress::from_u64(1), Bytes::from_static(b"abc"));
        let rts = Frame::rts(&d, 500);

        let cts = response_for(&p, &rts).unwrap();
        assert!(cts.is_cts());
        assert_eq!(cts.receiver, MacAddress::from_u64(1));
        assert_eq!(cts.duration, 500 - 16 - 44);
    }

    #[test]
    fn no_response_to_multicast_or_control() {
        let p = params();

        let d = Frame::data(MacAddress::BROADCAST, MacAddress::from_u64(1), Bytes::new());
        assert_eq!(response_for(&p, &d), None);

        let u = Frame::data(p.address, MacAddress::from_u64(1), Bytes::new());
        let ack = Frame::ack(&u, 0);
        assert_eq!(response_for(&p, &ack), None);
    }
}
