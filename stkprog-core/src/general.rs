//! General STK500v2 commands
//!
//! Sign-on, parameters, address loading and the uploads that configure
//! later programming commands. None of these touch the target.

use stkprog_protocol::commands::*;

use crate::config::Identity;
use crate::session::{SessionState, CONTROL_STACK_SIZE};
use crate::traits::{ProtocolError, Reply, Request};

/// Target voltage reported to the host, in tenths of a volt
pub const TARGET_VOLTAGE: u8 = 50;

/// `CMD_SIGN_ON`: answer with the length-prefixed programmer name
pub fn sign_on(identity: &Identity, req: &mut Request<'_>) -> Result<Reply, ProtocolError> {
    let name = identity.name.as_bytes();
    let out = req.output(2, name.len() + 1)?;
    out[0] = name.len() as u8;
    out[1..].copy_from_slice(name);
    Ok(Reply::ok(3 + name.len()))
}

/// `CMD_SET_PARAMETER`
///
/// Parameters from [`PARAM2_FIRST`] up carry a big-endian 16-bit value.
pub fn set_parameter(
    session: &mut SessionState,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    let param = req.byte(1)?;
    let value = if param >= PARAM2_FIRST {
        req.be_u16(2)?
    } else {
        req.byte(2)? as u16
    };
    debug!("set parameter {:#x} = {}", param, value);

    match param {
        // Any voltage, as long as it's 5 V
        PARAM_VTARGET | PARAM_VADJUST if value != TARGET_VOLTAGE as u16 => {
            return Err(ProtocolError::Unsupported)
        }
        PARAM_VTARGET | PARAM_VADJUST => {}
        PARAM_SCK_DURATION | PARAM2_SCK_DURATION => session.sck_duration = value,
        // Only active-low reset exists
        PARAM_RESET_POLARITY if value == 0 => return Err(ProtocolError::Unsupported),
        PARAM_RESET_POLARITY => {}
        PARAM_CONTROLLER_INIT => session.controller_init = value as u8,
        PARAM_OSC_PSCALE => session.osc_prescale = value as u8,
        PARAM_OSC_CMATCH => session.osc_cmatch = value as u8,
        // Sent by avrdude before TPI sessions
        PARAM_DISCHARGEDELAY => {}
        _ => {
            warn!("unsupported parameter {:#x}", param);
            return Err(ProtocolError::Unsupported);
        }
    }
    Ok(Reply::OK)
}

/// `CMD_GET_PARAMETER`: one-byte values at `BODY[2]`, two-byte values
/// big-endian at `BODY[2..4]`
pub fn get_parameter(
    session: &SessionState,
    identity: &Identity,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    let param = req.byte(1)?;
    let value = match param {
        PARAM2_SCK_DURATION => {
            let out = req.output(2, 2)?;
            out.copy_from_slice(&session.sck_duration.to_be_bytes());
            return Ok(Reply::ok(4));
        }
        PARAM_BUILD_NUMBER_LOW => identity.build_number as u8,
        PARAM_BUILD_NUMBER_HIGH => (identity.build_number >> 8) as u8,
        PARAM_HW_VER => identity.hardware_version,
        PARAM_SW_MAJOR => identity.software_major,
        PARAM_SW_MINOR => identity.software_minor,
        PARAM_VTARGET | PARAM_VADJUST => TARGET_VOLTAGE,
        PARAM_SCK_DURATION => session.sck_duration as u8,
        PARAM_RESET_POLARITY => 1,
        PARAM_CONTROLLER_INIT => session.controller_init,
        PARAM_OSC_PSCALE => session.osc_prescale,
        PARAM_OSC_CMATCH => session.osc_cmatch,
        PARAM_TOPCARD_DETECT => 0,
        _ => {
            warn!("unsupported parameter {:#x}", param);
            return Err(ProtocolError::Unsupported);
        }
    };
    req.put(2, value)?;
    Ok(Reply::ok(3))
}

/// `CMD_LOAD_ADDRESS`: big-endian address, bit 31 flags an extended address
pub fn load_address(
    session: &mut SessionState,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    session.address = req.be_u32(1)?;
    trace!("address {:#x}", session.address);
    Ok(Reply::OK)
}

/// `CMD_SET_CONTROL_STACK`: store the HVPP control signal patterns
pub fn set_control_stack(
    session: &mut SessionState,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    let stack = req.slice(1, CONTROL_STACK_SIZE)?;
    session.control_stack.copy_from_slice(stack);
    Ok(Reply::OK)
}

/// `CMD_XPROG_SETMODE`: select the interface used by `CMD_XPROG`
pub fn set_xprog_mode(
    session: &mut SessionState,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    session.xprog_mode = req.byte(1)?;
    Ok(Reply::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(bytes: &[u8]) -> [u8; 64] {
        let mut body = [0u8; 64];
        body[..bytes.len()].copy_from_slice(bytes);
        body
    }

    #[test]
    fn test_sign_on() {
        let identity = Identity::with_name("STK500_2");
        let mut buf = body(&[CMD_SIGN_ON]);
        let mut req = Request::new(&mut buf, 1);

        let reply = sign_on(&identity, &mut req).unwrap();
        assert_eq!(reply, Reply::ok(11));
        assert_eq!(&buf[2..11], b"\x08STK500_2");
    }

    #[test]
    fn test_set_and_get_sck_duration() {
        let mut session = SessionState::new();
        let identity = Identity::default();

        let mut buf = body(&[CMD_SET_PARAMETER, PARAM_SCK_DURATION, 0]);
        set_parameter(&mut session, &mut Request::new(&mut buf, 3)).unwrap();
        assert_eq!(session.sck_duration, 0);

        let mut buf = body(&[CMD_SET_PARAMETER, PARAM2_SCK_DURATION, 0x01, 0x20]);
        set_parameter(&mut session, &mut Request::new(&mut buf, 4)).unwrap();
        assert_eq!(session.sck_duration, 0x0120);

        let mut buf = body(&[CMD_GET_PARAMETER, PARAM2_SCK_DURATION]);
        let reply = get_parameter(&session, &identity, &mut Request::new(&mut buf, 2)).unwrap();
        assert_eq!(reply.len, 4);
        assert_eq!(&buf[2..4], &[0x01, 0x20]);
    }

    #[test]
    fn test_voltage_must_be_five_volts() {
        let mut session = SessionState::new();

        let mut buf = body(&[CMD_SET_PARAMETER, PARAM_VTARGET, 50]);
        assert_eq!(
            set_parameter(&mut session, &mut Request::new(&mut buf, 3)),
            Ok(Reply::OK)
        );

        let mut buf = body(&[CMD_SET_PARAMETER, PARAM_VTARGET, 33]);
        assert_eq!(
            set_parameter(&mut session, &mut Request::new(&mut buf, 3)),
            Err(ProtocolError::Unsupported)
        );
    }

    #[test]
    fn test_reset_polarity() {
        let mut session = SessionState::new();
        let mut buf = body(&[CMD_SET_PARAMETER, PARAM_RESET_POLARITY, 0]);
        assert!(set_parameter(&mut session, &mut Request::new(&mut buf, 3)).is_err());

        let mut buf = body(&[CMD_SET_PARAMETER, PARAM_RESET_POLARITY, 1]);
        assert!(set_parameter(&mut session, &mut Request::new(&mut buf, 3)).is_ok());
    }

    #[test]
    fn test_unknown_parameter_leaves_session_unchanged() {
        let mut session = SessionState::new();
        let before = session.clone();
        let mut buf = body(&[CMD_SET_PARAMETER, 0x42, 7]);
        assert_eq!(
            set_parameter(&mut session, &mut Request::new(&mut buf, 3)),
            Err(ProtocolError::Unsupported)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn test_get_identity_parameters() {
        let session = SessionState::new();
        let mut identity = Identity::default();
        identity.build_number = 0x1234;

        let mut buf = body(&[CMD_GET_PARAMETER, PARAM_BUILD_NUMBER_HIGH]);
        let reply = get_parameter(&session, &identity, &mut Request::new(&mut buf, 2)).unwrap();
        assert_eq!(reply, Reply::ok(3));
        assert_eq!(buf[2], 0x12);

        let mut buf = body(&[CMD_GET_PARAMETER, PARAM_VTARGET]);
        get_parameter(&session, &identity, &mut Request::new(&mut buf, 2)).unwrap();
        assert_eq!(buf[2], TARGET_VOLTAGE);
    }

    #[test]
    fn test_load_address_big_endian() {
        let mut session = SessionState::new();
        let mut buf = body(&[CMD_LOAD_ADDRESS, 0x80, 0x01, 0x02, 0x03]);
        load_address(&mut session, &mut Request::new(&mut buf, 5)).unwrap();
        assert_eq!(session.address, 0x8001_0203);
        assert!(session.is_extended());
    }

    #[test]
    fn test_short_body_is_malformed() {
        let mut session = SessionState::new();
        let mut buf = body(&[CMD_LOAD_ADDRESS, 0x00, 0x01]);
        assert_eq!(
            load_address(&mut session, &mut Request::new(&mut buf, 3)),
            Err(ProtocolError::Malformed)
        );
        assert_eq!(session.address, 0);
    }

    #[test]
    fn test_set_control_stack() {
        let mut session = SessionState::new();
        let mut bytes = [0u8; 33];
        bytes[0] = CMD_SET_CONTROL_STACK;
        for (i, b) in bytes[1..].iter_mut().enumerate() {
            *b = i as u8 + 0x40;
        }
        let mut buf = body(&bytes);
        set_control_stack(&mut session, &mut Request::new(&mut buf, 33)).unwrap();
        assert_eq!(session.control_stack[0], 0x40);
        assert_eq!(session.control_stack[31], 0x5F);
    }
}
