//! # Library Profiles
//!
//! Static table of which exported functions carry TLS plaintext in each
//! supported library family, and which kernel program handles each of them.
//!
//! | Family  | Write side                     | Read side                      |
//! |---------|--------------------------------|--------------------------------|
//! | OpenSSL | `SSL_write`                    | `SSL_read`                     |
//! | GnuTLS  | `gnutls_record_send`           | `gnutls_record_recv`           |
//! | NSS     | `PR_Write`, `PR_Send`          | `PR_Read`, `PR_Recv`           |
//!
//! Every function gets an entry probe and a return probe. The entry probe is
//! always listed first so the return probe never fires for a call whose entry
//! was not yet instrumented.

use std::fmt;

use sslsniff_common::Direction;

/// Kernel program recording entry arguments of read-side calls
pub const READ_ENTER_PROGRAM: &str = "ssl_read_enter";
/// Kernel program completing read-side calls
pub const READ_RETURN_PROGRAM: &str = "ssl_read_return";
/// Kernel program recording entry arguments of write-side calls
pub const WRITE_ENTER_PROGRAM: &str = "ssl_write_enter";
/// Kernel program completing write-side calls
pub const WRITE_RETURN_PROGRAM: &str = "ssl_write_return";
/// Kernel program binding an OpenSSL session to its socket fd
pub const SET_FD_PROGRAM: &str = "ssl_set_fd";

/// Every program in the kernel object, loaded once before any attach
pub const ALL_PROGRAMS: [&str; 5] = [
    READ_ENTER_PROGRAM,
    READ_RETURN_PROGRAM,
    WRITE_ENTER_PROGRAM,
    WRITE_RETURN_PROGRAM,
    SET_FD_PROGRAM,
];

/// Supported TLS library families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryFamily {
    OpenSsl,
    GnuTls,
    Nss,
}

impl LibraryFamily {
    pub const ALL: [LibraryFamily; 3] =
        [LibraryFamily::OpenSsl, LibraryFamily::GnuTls, LibraryFamily::Nss];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            LibraryFamily::OpenSsl => "openssl",
            LibraryFamily::GnuTls => "gnutls",
            LibraryFamily::Nss => "nss",
        }
    }

    #[must_use]
    pub fn profile(self) -> &'static LibraryProfile {
        profile_for(self)
    }
}

impl fmt::Display for LibraryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of a call a probe fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Enter,
    Return,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Enter => f.write_str("entry"),
            Phase::Return => f.write_str("return"),
        }
    }
}

/// One probe to place: symbol, direction and phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSpec {
    pub symbol: &'static str,
    pub direction: Direction,
    pub phase: Phase,
}

impl ProbeSpec {
    const fn enter(symbol: &'static str, direction: Direction) -> Self {
        Self { symbol, direction, phase: Phase::Enter }
    }

    const fn ret(symbol: &'static str, direction: Direction) -> Self {
        Self { symbol, direction, phase: Phase::Return }
    }

    /// Name of the kernel program serving this probe
    #[must_use]
    pub fn program(&self) -> &'static str {
        match (self.direction, self.phase) {
            (Direction::Read, Phase::Enter) => READ_ENTER_PROGRAM,
            (Direction::Read, Phase::Return) => READ_RETURN_PROGRAM,
            (Direction::Write, Phase::Enter) => WRITE_ENTER_PROGRAM,
            (Direction::Write, Phase::Return) => WRITE_RETURN_PROGRAM,
        }
    }
}

/// Auxiliary probe that enriches records but captures nothing itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBinding {
    pub symbol: &'static str,
    pub program: &'static str,
}

/// Probe layout for one library family
#[derive(Debug)]
pub struct LibraryProfile {
    pub family: LibraryFamily,
    pub specs: &'static [ProbeSpec],
    pub bindings: &'static [SessionBinding],
}

static OPENSSL: LibraryProfile = LibraryProfile {
    family: LibraryFamily::OpenSsl,
    specs: &[
        ProbeSpec::enter("SSL_write", Direction::Write),
        ProbeSpec::ret("SSL_write", Direction::Write),
        ProbeSpec::enter("SSL_read", Direction::Read),
        ProbeSpec::ret("SSL_read", Direction::Read),
    ],
    bindings: &[SessionBinding { symbol: "SSL_set_fd", program: SET_FD_PROGRAM }],
};

static GNUTLS: LibraryProfile = LibraryProfile {
    family: LibraryFamily::GnuTls,
    specs: &[
        ProbeSpec::enter("gnutls_record_send", Direction::Write),
        ProbeSpec::ret("gnutls_record_send", Direction::Write),
        ProbeSpec::enter("gnutls_record_recv", Direction::Read),
        ProbeSpec::ret("gnutls_record_recv", Direction::Read),
    ],
    bindings: &[],
};

static NSS: LibraryProfile = LibraryProfile {
    family: LibraryFamily::Nss,
    specs: &[
        ProbeSpec::enter("PR_Write", Direction::Write),
        ProbeSpec::ret("PR_Write", Direction::Write),
        ProbeSpec::enter("PR_Read", Direction::Read),
        ProbeSpec::ret("PR_Read", Direction::Read),
        ProbeSpec::enter("PR_Send", Direction::Write),
        ProbeSpec::ret("PR_Send", Direction::Write),
        ProbeSpec::enter("PR_Recv", Direction::Read),
        ProbeSpec::ret("PR_Recv", Direction::Read),
    ],
    bindings: &[],
};

/// Probe layout for `family`
#[must_use]
pub fn profile_for(family: LibraryFamily) -> &'static LibraryProfile {
    match family {
        LibraryFamily::OpenSsl => &OPENSSL,
        LibraryFamily::GnuTls => &GNUTLS,
        LibraryFamily::Nss => &NSS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_symbol_has_entry_before_return() {
        for family in LibraryFamily::ALL {
            let specs = profile_for(family).specs;
            assert_eq!(specs.len() % 2, 0, "{family}");
            for pair in specs.chunks(2) {
                assert_eq!(pair[0].symbol, pair[1].symbol);
                assert_eq!(pair[0].direction, pair[1].direction);
                assert_eq!(pair[0].phase, Phase::Enter);
                assert_eq!(pair[1].phase, Phase::Return);
            }
        }
    }

    #[test]
    fn test_profile_sizes() {
        assert_eq!(profile_for(LibraryFamily::OpenSsl).specs.len(), 4);
        assert_eq!(profile_for(LibraryFamily::GnuTls).specs.len(), 4);
        assert_eq!(profile_for(LibraryFamily::Nss).specs.len(), 8);
    }

    #[test]
    fn test_profile_family_matches() {
        for family in LibraryFamily::ALL {
            assert_eq!(family.profile().family, family);
        }
    }

    #[test]
    fn test_program_names() {
        let specs = profile_for(LibraryFamily::OpenSsl).specs;
        let programs: Vec<_> = specs.iter().map(ProbeSpec::program).collect();
        assert_eq!(
            programs,
            [WRITE_ENTER_PROGRAM, WRITE_RETURN_PROGRAM, READ_ENTER_PROGRAM, READ_RETURN_PROGRAM]
        );
        for program in programs {
            assert!(ALL_PROGRAMS.contains(&program));
        }
    }

    #[test]
    fn test_nss_attach_order() {
        let order: Vec<_> = profile_for(LibraryFamily::Nss)
            .specs
            .iter()
            .filter(|s| s.phase == Phase::Enter)
            .map(|s| s.symbol)
            .collect();
        assert_eq!(order, ["PR_Write", "PR_Read", "PR_Send", "PR_Recv"]);
    }

    #[test]
    fn test_nss_directions() {
        let specs = profile_for(LibraryFamily::Nss).specs;
        let writes: Vec<_> = specs
            .iter()
            .filter(|s| s.direction == Direction::Write && s.phase == Phase::Enter)
            .map(|s| s.symbol)
            .collect();
        assert_eq!(writes, ["PR_Write", "PR_Send"]);
    }

    #[test]
    fn test_only_openssl_binds_sessions() {
        assert_eq!(profile_for(LibraryFamily::OpenSsl).bindings.len(), 1);
        assert!(profile_for(LibraryFamily::GnuTls).bindings.is_empty());
        assert!(profile_for(LibraryFamily::Nss).bindings.is_empty());
    }
}
