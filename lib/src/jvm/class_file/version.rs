use super::Serialize;
use byteorder::WriteBytesExt;
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub major_version: u16,
    pub minor_version: u16,
}

impl Version {
    const fn major(major_version: u16) -> Version {
        Version {
            major_version,
            minor_version: 0,
        }
    }

    pub const JAVA5: Version = Version::major(49);

    /// First version where the `StackMapTable` attribute is used
    pub const JAVA6: Version = Version::major(50);

    /// First version where the `StackMapTable` is mandatory and `jsr`/`ret` are forbidden
    pub const JAVA7: Version = Version::major(51);
    pub const JAVA8: Version = Version::major(52);
    pub const JAVA9: Version = Version::major(53);
    pub const JAVA11: Version = Version::major(55);
    pub const JAVA17: Version = Version::major(61);

    /// Does this version of class file carry `StackMapTable` attributes?
    pub fn has_stack_map_frames(&self) -> bool {
        self.major_version >= Version::JAVA6.major_version
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}
