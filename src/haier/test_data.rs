//! Status frames captured from units, shared by the codec and controller tests.

use hex_literal::hex;

/// Revision B: powered on, cooling, 27C indoors, set to 24C.
pub const STATUS_B: [u8; 25] = hex!("ffff1440000000000001 6d010808000000030000000b e11bae");

/// Revision A: powered on, heating, 25C indoors, set to 22C.
pub const STATUS_A: [u8; 47] = hex!(
    "ffff2c40000000000001 6d0106000000000300000009000200000000000000000000000000000000000000000000ef"
);
