//! Asset and decoding collaborators: decoded images and analyzed audio that generators receive
//! through `image` and `audio` settings.

pub(crate) mod audio;
pub(crate) mod decode;
