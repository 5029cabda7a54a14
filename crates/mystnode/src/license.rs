pub const WARRANTY: &str = "\
This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.";

pub const CONDITIONS: &str = "\
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files, to deal in the Software
without restriction, subject to the conditions of the MIT License. The above
copyright notice and this permission notice shall be included in all copies
or substantial portions of the Software.";

/// Short banner printed when the node starts.
pub fn summary() -> String {
    format!(
        "mystnode {}\nRun with 'license --warranty' or 'license --conditions' for details.",
        env!("CARGO_PKG_VERSION")
    )
}
