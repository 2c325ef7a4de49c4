use crate::error::{Error, Result};

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

// AMQP 1.0 format codes needed by the tracking protocol
pub(crate) const FC_DESCRIBED: u8 = 0x00;
pub(crate) const FC_SMALL_ULONG: u8 = 0x53;
pub(crate) const FC_ULONG: u8 = 0x80;
pub(crate) const FC_BOOL_TRUE: u8 = 0x41;
pub(crate) const FC_BOOL_FALSE: u8 = 0x42;
pub(crate) const FC_BOOL: u8 = 0x56;
pub(crate) const FC_LIST0: u8 = 0x45;
pub(crate) const FC_LIST8: u8 = 0xc0;
pub(crate) const FC_LIST32: u8 = 0xd0;
pub(crate) const FC_MAP8: u8 = 0xc1;
pub(crate) const FC_MAP32: u8 = 0xd1;
pub(crate) const FC_ARRAY8: u8 = 0xe0;
pub(crate) const FC_ARRAY32: u8 = 0xf0;
pub(crate) const FC_VBIN8: u8 = 0xa0;
pub(crate) const FC_VBIN32: u8 = 0xb0;
pub(crate) const FC_STR8: u8 = 0xa1;
pub(crate) const FC_STR32: u8 = 0xb1;
pub(crate) const FC_SYM8: u8 = 0xa3;
pub(crate) const FC_SYM32: u8 = 0xb3;

/// Descriptor code of the amqp-value body section
pub(crate) const DESC_AMQP_VALUE: u64 = 0x77;

/// One address-tracking update from the interior router
///
/// The message body is an amqp-value section holding a list of exactly two scalars: the
/// address key (class prefix included) and a boolean stating whether the address still has
/// destinations reachable via the interior. Anything else fails validation and the
/// delivery is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingUpdate {
    pub address: Bytes,
    pub reachable: bool,
}

impl fmt::Display for TrackingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrackingUpdate({}, {})",
            String::from_utf8_lossy(&self.address),
            self.reachable
        )
    }
}

impl TrackingUpdate {
    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let mut pos = Self::check_depth(raw)?;

        // List header
        let code = *raw.get(pos).ok_or(Error::ErrBodyTooShort)?;
        pos += 1;
        let (count, end) = match code {
            FC_LIST0 => (0u32, pos),
            FC_LIST8 => {
                if raw.len() < pos + 2 {
                    return Err(Error::ErrBodyTooShort);
                }
                let size = raw[pos] as usize;
                let count = raw[pos + 1] as u32;
                if size < 1 || raw.len() < pos + 1 + size {
                    return Err(Error::ErrElementOverrun);
                }
                (count, pos + 1 + size)
            }
            FC_LIST32 => {
                if raw.len() < pos + 8 {
                    return Err(Error::ErrBodyTooShort);
                }
                let size = u32::from_be_bytes([raw[pos], raw[pos + 1], raw[pos + 2], raw[pos + 3]])
                    as usize;
                let count = u32::from_be_bytes([raw[pos + 4], raw[pos + 5], raw[pos + 6], raw[pos + 7]]);
                if size < 4 || raw.len() < pos + 4 + size {
                    return Err(Error::ErrElementOverrun);
                }
                (count, pos + 4 + size)
            }
            _ => return Err(Error::ErrTrackingNotList),
        };
        pos = match code {
            FC_LIST8 => pos + 2,
            FC_LIST32 => pos + 8,
            _ => pos,
        };

        if count != 2 {
            return Err(Error::ErrTrackingElementCount);
        }

        let (address, pos) = Self::read_address(raw, pos, end)?;
        let reachable = Self::read_bool(raw, pos, end)?;

        Ok(TrackingUpdate { address, reachable })
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let addr_len = self.address.len();
        let addr_enc = if addr_len <= u8::MAX as usize {
            2 + addr_len
        } else if addr_len <= u32::MAX as usize {
            5 + addr_len
        } else {
            return Err(Error::ErrAddressTooLong);
        };
        let elements = addr_enc + 1;

        let mut buf = BytesMut::with_capacity(elements + 12);
        buf.put_u8(FC_DESCRIBED);
        buf.put_u8(FC_SMALL_ULONG);
        buf.put_u8(DESC_AMQP_VALUE as u8);

        if elements + 1 <= u8::MAX as usize {
            buf.put_u8(FC_LIST8);
            buf.put_u8((elements + 1) as u8);
            buf.put_u8(2);
        } else {
            buf.put_u8(FC_LIST32);
            buf.put_u32((elements + 4) as u32);
            buf.put_u32(2);
        }

        if addr_len <= u8::MAX as usize {
            buf.put_u8(FC_VBIN8);
            buf.put_u8(addr_len as u8);
        } else {
            buf.put_u8(FC_VBIN32);
            buf.put_u32(addr_len as u32);
        }
        buf.put_slice(&self.address);
        buf.put_u8(if self.reachable {
            FC_BOOL_TRUE
        } else {
            FC_BOOL_FALSE
        });

        Ok(buf.freeze())
    }

    /// Validate the body section header and return the offset of the section value.
    ///
    /// Mirrors the router's body depth check: the section must be a described amqp-value.
    fn check_depth(raw: &Bytes) -> Result<usize> {
        if raw.len() < 3 {
            return Err(Error::ErrBodyTooShort);
        }
        if raw[0] != FC_DESCRIBED {
            return Err(Error::ErrBodyNotAmqpValue);
        }
        let (descriptor, pos) = match raw[1] {
            FC_SMALL_ULONG => (raw[2] as u64, 3),
            FC_ULONG => {
                if raw.len() < 10 {
                    return Err(Error::ErrBodyTooShort);
                }
                let mut v = [0u8; 8];
                v.copy_from_slice(&raw[2..10]);
                (u64::from_be_bytes(v), 10)
            }
            _ => return Err(Error::ErrBodyNotAmqpValue),
        };
        if descriptor != DESC_AMQP_VALUE {
            return Err(Error::ErrBodyNotAmqpValue);
        }
        Ok(pos)
    }

    fn read_address(raw: &Bytes, pos: usize, end: usize) -> Result<(Bytes, usize)> {
        let code = *raw.get(pos).filter(|_| pos < end).ok_or(Error::ErrElementOverrun)?;
        let (len, data) = match code {
            FC_VBIN8 | FC_STR8 | FC_SYM8 => {
                if pos + 2 > end {
                    return Err(Error::ErrElementOverrun);
                }
                (raw[pos + 1] as usize, pos + 2)
            }
            FC_VBIN32 | FC_STR32 | FC_SYM32 => {
                if pos + 5 > end {
                    return Err(Error::ErrElementOverrun);
                }
                let len =
                    u32::from_be_bytes([raw[pos + 1], raw[pos + 2], raw[pos + 3], raw[pos + 4]]);
                (len as usize, pos + 5)
            }
            FC_DESCRIBED | FC_LIST0 | FC_LIST8 | FC_LIST32 | FC_MAP8 | FC_MAP32 | FC_ARRAY8
            | FC_ARRAY32 => return Err(Error::ErrTrackingAddressNotScalar),
            _ => return Err(Error::ErrFormatCodeUnhandled { code }),
        };
        if data + len > end {
            return Err(Error::ErrElementOverrun);
        }
        Ok((raw.slice(data..data + len), data + len))
    }

    fn read_bool(raw: &Bytes, pos: usize, end: usize) -> Result<bool> {
        let code = *raw.get(pos).filter(|_| pos < end).ok_or(Error::ErrElementOverrun)?;
        match code {
            FC_BOOL_TRUE => Ok(true),
            FC_BOOL_FALSE => Ok(false),
            FC_BOOL => {
                if pos + 2 > end {
                    return Err(Error::ErrElementOverrun);
                }
                Ok(raw[pos + 1] != 0)
            }
            _ => Err(Error::ErrTrackingReachableNotBool),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_unmarshal_vbin8_true() -> Result<()> {
        let raw = Bytes::from_static(&hex!("00 53 77 c0 08 02 a0 04 4d 66 6f 6f 41"));
        let update = TrackingUpdate::unmarshal(&raw)?;
        assert_eq!(&update.address[..], b"Mfoo", "address should be Mfoo");
        assert!(update.reachable, "reachable should be true");
        Ok(())
    }

    #[test]
    fn test_unmarshal_str8_encoded_bool_false() -> Result<()> {
        let raw = Bytes::from_static(&hex!("00 53 77 c0 09 02 a1 04 4d 62 61 72 56 00"));
        let update = TrackingUpdate::unmarshal(&raw)?;
        assert_eq!(&update.address[..], b"Mbar", "address should be Mbar");
        assert!(!update.reachable, "reachable should be false");
        Ok(())
    }

    #[test]
    fn test_unmarshal_ulong_descriptor() -> Result<()> {
        let raw = Bytes::from_static(&hex!(
            "00 80 0000000000000077 c0 05 02 a0 01 58 42"
        ));
        let update = TrackingUpdate::unmarshal(&raw)?;
        assert_eq!(&update.address[..], b"X", "address should be X");
        assert!(!update.reachable, "reachable should be false");
        Ok(())
    }

    #[test]
    fn test_unmarshal_list32_vbin32() -> Result<()> {
        let raw = Bytes::from_static(&hex!(
            "00 53 77 d0 0000000e 00000002 b0 00000004 4d 66 6f 6f 41"
        ));
        let update = TrackingUpdate::unmarshal(&raw)?;
        assert_eq!(&update.address[..], b"Mfoo", "address should be Mfoo");
        assert!(update.reachable, "reachable should be true");
        Ok(())
    }

    #[test]
    fn test_unmarshal_rejects_truncated_body() {
        let raw = Bytes::from_static(&hex!("00 53"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrBodyTooShort)
        );
    }

    #[test]
    fn test_unmarshal_rejects_data_section() {
        let raw = Bytes::from_static(&hex!("00 53 75 a0 01 00"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrBodyNotAmqpValue)
        );
    }

    #[test]
    fn test_unmarshal_rejects_non_list_value() {
        let raw = Bytes::from_static(&hex!("00 53 77 a1 03 66 6f 6f"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrTrackingNotList)
        );
    }

    #[test]
    fn test_unmarshal_rejects_short_list() {
        let raw = Bytes::from_static(&hex!("00 53 77 c0 07 01 a0 04 4d 66 6f 6f"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrTrackingElementCount)
        );
    }

    #[test]
    fn test_unmarshal_rejects_empty_list() {
        let raw = Bytes::from_static(&hex!("00 53 77 45"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrTrackingElementCount)
        );
    }

    #[test]
    fn test_unmarshal_rejects_nested_list_address() {
        let raw = Bytes::from_static(&hex!("00 53 77 c0 03 02 45 41"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrTrackingAddressNotScalar)
        );
    }

    #[test]
    fn test_unmarshal_rejects_non_boolean_flag() {
        let raw = Bytes::from_static(&hex!("00 53 77 c0 08 02 a0 03 66 6f 6f a0 00"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrTrackingReachableNotBool)
        );
    }

    #[test]
    fn test_unmarshal_rejects_overrunning_element() {
        let raw = Bytes::from_static(&hex!("00 53 77 c0 04 02 a0 10 41"));
        assert_eq!(
            TrackingUpdate::unmarshal(&raw),
            Err(Error::ErrElementOverrun)
        );
    }

    #[test]
    fn test_marshal_canonical_bytes() -> Result<()> {
        let update = TrackingUpdate {
            address: Bytes::from_static(b"Mfoo"),
            reachable: true,
        };
        let raw = update.marshal()?;
        assert_eq!(
            &raw[..],
            &hex!("00 53 77 c0 08 02 a0 04 4d 66 6f 6f 41")[..],
            "marshal should produce the canonical encoding"
        );
        assert_eq!(TrackingUpdate::unmarshal(&raw)?, update);
        Ok(())
    }

    #[test]
    fn test_marshal_unreachable() -> Result<()> {
        let update = TrackingUpdate {
            address: Bytes::from_static(b"Mbar"),
            reachable: false,
        };
        let raw = update.marshal()?;
        assert_eq!(TrackingUpdate::unmarshal(&raw)?, update);
        Ok(())
    }
}
