//! Directory snapshots and the presentation metadata derived for each entry.

use serde::{Deserialize, Serialize};

/// Extensions with a dedicated icon in the frontend icon set.
const ICONS: &[&str] = &[
    "3g2", "3ga", "3gp", "7z", "aac", "aa", "accdb", "accdt", "ace", "ac", "adn", "aifc", "aiff",
    "aif", "ai", "ait", "amr", "ani", "apk", "applescript", "app", "asax", "asc", "ascx", "asf",
    "ash", "ashx", "asm", "asmx", "asp", "aspx", "asx", "aup", "au", "avi", "axd", "aze", "bak",
    "bash", "bat", "bin", "blank", "bmp", "bowerrc", "bpg", "browser", "bz2", "bzempty", "cab",
    "cad", "caf", "cal", "catalog.json", "cdda", "cd", "cer", "cfg", "cfml", "cfm", "cgi", "chm",
    "class", "cmd", "codekit", "code-workspace", "coffeelintignore", "coffee", "compile", "com",
    "config", "conf", "cpp", "cptx", "cr2", "crdownload", "crt", "crypt", "csh", "cson", "csproj",
    "css", "cs", "c", "csv", "cue", "cur", "dart", "data", "dat", "dbf", "db", "deb", "default",
    "dgn", "dist", "diz", "dll", "dmg", "dng", "docb", "docm", "doc", "docx", "dotm", "dot",
    "dotx", "download", "dpj", "dsn", "ds_store", "dtd", "dwg", "dxf", "editorconfig", "elf",
    "el", "eml", "enc", "eot", "eps", "epub", "eslintignore", "exe", "f4v", "fax", "fb2", "flac",
    "fla", "flv", "fnt", "folder", "fon", "gadget", "gdp", "gem", "gif", "gitattributes",
    "gitignore", "go", "gpg", "gpl", "gradle", "gz", "handlebars", "hbs", "heic", "hlp", "hsl",
    "hs", "h", "html", "htm", "ibooks", "icns", "ico", "ics", "idx", "iff", "ifo", "image", "img",
    "iml", "inc", "indd", "info", "inf", "ini", "in", "inv", "iso", "j2", "jar", "java", "jpeg",
    "jpe", "jpg", "json", "jsp", "js", "jsx", "key", "kf8", "kmk", "ksh", "kts", "kt", "kup",
    "less", "lex", "licx", "lisp", "lit", "lnk", "lock", "log", "lua", "m2v", "m3u8", "m3u",
    "m4a", "m4r", "m4", "m4v", "map", "master", "mc", "mdb", "mdf", "md", "me", "midi", "mid",
    "mi", "mk", "mkv", "mm", "mng", "mobi", "mod", "mo", "mov", "mp2", "mp3", "mp4", "mpa", "mpd",
    "mpeg", "mpe", "mpga", "mpg", "mpp", "mpt", "msg", "msi", "msu", "m", "nef", "nes", "nfo",
    "nix", "npmignore", "ocx", "odb", "ods", "odt", "ogg", "ogv", "ost", "otf", "ott", "ova",
    "ovf", "p12", "p7b", "pages", "part", "pcd", "pdb", "pdf", "pem", "pfx", "pgp", "phar", "php",
    "ph", "pid", "pkg", "plist", "pl", "pm", "png", "pom", "po", "pot", "potx", "pps", "ppsx",
    "pptm", "ppt", "pptx", "prop", "ps1", "psd", "psp", "ps", "pst", "pub", "pyc", "py", "qt",
    "ram", "rar", "ra", "raw", "rb", "rdf", "rdl", "reg", "resx", "retry", "rm", "rom", "rpm",
    "rpt", "rsa", "rss", "rst", "rtf", "rub", "ru", "sass", "scss", "sdf", "sed", "sh", "sitemap",
    "sit", "skin", "sldm", "sldx", "sln", "sol", "sphinx", "sqlite", "sql", "step", "stl", "svg",
    "swd", "swf", "swift", "swp", "sys", "tar", "tax", "tcsh", "tex", "tfignore", "tga", "tgz",
    "tiff", "tif", "tmp", "tmx", "torrent", "tpl", "ts", "tsv", "ttf", "twig", "txt", "udf",
    "vbproj", "vbs", "vb", "vcd", "vcf", "vcs", "vdi", "vdx", "vmdk", "vob", "vox",
    "vscodeignore", "vsd", "vss", "vst", "vsx", "vtx", "war", "wav", "wbk", "webinfo", "webm",
    "webp", "wma", "wmf", "wmv", "woff2", "woff", "wps", "wsf", "xaml", "xcf", "xfl", "xlm",
    "xlsm", "xls", "xlsx", "xltm", "xlt", "xltx", "xml", "xpi", "xps", "xrb", "xsd", "xsl",
    "xspf", "xz", "yaml", "yml", "zip", "zsh", "z",
];

/// Icon used when no extension matches.
pub const DEFAULT_ICON: &str = "blank";

/// Image formats the thumbnailer accepts.
const THUMBNAIL_EXTENSIONS: &[&str] = &["gif", "jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Archive suffixes that can be extracted, longest first.
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip"];

/// First segment of every thumbnail reference.
pub const THUMBNAIL_DIRECTORY: &str = "thumbnails";

/// A point-in-time listing of one directory.
///
/// Two snapshots are equal iff path, directories and files are element-wise
/// equal, including order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub path: String,
    pub directories: Vec<String>,
    pub files: Vec<Entry>,
}

/// A file in a [`Directory`] together with its derived presentation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub archive: bool,
}

/// Raw object as reported by a storage listing, before decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub etag: String,
}

/// Raw listing as reported by storage, before decoration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Listing {
    pub path: String,
    pub directories: Vec<String>,
    pub objects: Vec<ObjectInfo>,
}

impl Directory {
    /// Decorate a raw storage listing.
    pub fn from_listing(listing: Listing) -> Self {
        let prefix = directory_prefix(&listing.path);
        Self {
            files: listing
                .objects
                .into_iter()
                .map(|object| Entry::from_object(object, &prefix))
                .collect(),
            path: listing.path,
            directories: listing.directories,
        }
    }

    /// Plain-text rendering used for command-line clients
    pub fn to_text(&self) -> String {
        let mut out = format!("{}:\n", self.path);
        for dir in &self.directories {
            out.push_str(dir);
            out.push_str("/\n");
        }
        for file in &self.files {
            out.push_str(&format!("{} ({} Byte)\n", file.name, file.size));
        }
        out
    }
}

impl Entry {
    /// Build an entry for an object listed under `prefix` and derive its
    /// icon, thumbnail and archive flag.
    pub fn from_object(object: ObjectInfo, prefix: &str) -> Self {
        let key = format!("{}{}", prefix, object.name);
        Self {
            icon: icon_for(&object.name).to_string(),
            thumbnail: thumbnail_for(&key, &object.etag),
            archive: archive_suffix(&object.name).is_some(),
            name: object.name,
            size: object.size,
        }
    }
}

/// Icon name for a file, matched on the first known extension suffix.
pub fn icon_for(name: &str) -> &'static str {
    ICONS
        .iter()
        .find(|ext| {
            name.len() > ext.len()
                && name.ends_with(*ext)
                && name.as_bytes()[name.len() - ext.len() - 1] == b'.'
        })
        .copied()
        .unwrap_or(DEFAULT_ICON)
}

/// Whether the thumbnailer can render this file.
pub fn thumbnail_supported(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => THUMBNAIL_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Thumbnail reference for the object at `key`, if it is an image:
/// `thumbnails/<etag>/<key>`. The etag pins the rendering to one version of
/// the object.
pub fn thumbnail_for(key: &str, etag: &str) -> Option<String> {
    thumbnail_supported(key).then(|| format!("{}/{}/{}", THUMBNAIL_DIRECTORY, etag, key))
}

/// The extractable archive suffix of a path, if any.
pub fn archive_suffix(path: &str) -> Option<&'static str> {
    ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| path.len() > suffix.len() && path.ends_with(*suffix))
        .copied()
}

/// Trim surrounding slashes: `"/docs/"` becomes `"docs"`, `"/"` becomes `""`.
pub fn normalize_key(path: &str) -> &str {
    path.trim_matches('/')
}

/// Key prefix for listing a directory: `"docs/"`, or `""` for the root.
pub fn directory_prefix(path: &str) -> String {
    let key = normalize_key(path);
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

/// Display path of a directory: `"/docs"`, or `"/"` for the root.
pub fn display_path(path: &str) -> String {
    format!("/{}", normalize_key(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str, size: u64) -> ObjectInfo {
        ObjectInfo {
            name: name.to_string(),
            size,
            etag: "abc123".to_string(),
        }
    }

    #[test]
    fn test_icon_matching() {
        assert_eq!(icon_for("report.pdf"), "pdf");
        assert_eq!(icon_for("archive.tar"), "tar");
        assert_eq!(icon_for("photo.jpeg"), "jpeg");
        assert_eq!(icon_for("notes"), DEFAULT_ICON);
        assert_eq!(icon_for("pdf"), DEFAULT_ICON);
        assert_eq!(icon_for("catalog.json"), "json");
        // "ts" must not match a name that merely ends in those letters
        assert_eq!(icon_for("charts"), DEFAULT_ICON);
    }

    #[test]
    fn test_thumbnail_eligibility() {
        assert!(thumbnail_supported("a.png"));
        assert!(thumbnail_supported("b.webp"));
        assert!(!thumbnail_supported("c.pdf"));
        assert!(!thumbnail_supported("png"));

        assert_eq!(
            thumbnail_for("pics/a.png", "e1"),
            Some("thumbnails/e1/pics/a.png".to_string())
        );
        assert_eq!(thumbnail_for("pics/a.txt", "e1"), None);
    }

    #[test]
    fn test_archive_suffix() {
        assert_eq!(archive_suffix("/docs/site.tar.gz"), Some(".tar.gz"));
        assert_eq!(archive_suffix("bundle.tgz"), Some(".tgz"));
        assert_eq!(archive_suffix("bundle.tar"), Some(".tar"));
        assert_eq!(archive_suffix("bundle.zip"), Some(".zip"));
        assert_eq!(archive_suffix("bundle.rar"), None);
        assert_eq!(archive_suffix(".zip"), None);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(directory_prefix("/"), "");
        assert_eq!(directory_prefix(""), "");
        assert_eq!(directory_prefix("/docs"), "docs/");
        assert_eq!(directory_prefix("docs/a/"), "docs/a/");
        assert_eq!(display_path("docs/"), "/docs");
        assert_eq!(display_path("/"), "/");
    }

    #[test]
    fn test_directory_equality_is_order_sensitive() {
        let a = Directory::from_listing(Listing {
            path: "/docs".to_string(),
            directories: vec!["a".to_string(), "b".to_string()],
            objects: vec![object("x.txt", 1)],
        });
        let mut b = a.clone();
        assert_eq!(a, b);

        b.directories.reverse();
        assert_ne!(a, b);

        let mut c = a.clone();
        c.files[0].size = 2;
        assert_ne!(a, c);
    }

    #[test]
    fn test_entry_decoration_and_json() {
        let dir = Directory::from_listing(Listing {
            path: "/".to_string(),
            directories: vec![],
            objects: vec![object("photo.png", 10), object("site.zip", 20)],
        });

        assert_eq!(dir.files[0].icon, "png");
        assert_eq!(
            dir.files[0].thumbnail.as_deref(),
            Some("thumbnails/abc123/photo.png")
        );
        assert!(!dir.files[0].archive);
        assert!(dir.files[1].archive);

        let json = serde_json::to_value(&dir).unwrap();
        assert_eq!(json["path"], "/");
        assert_eq!(json["files"][1]["name"], "site.zip");
        assert!(json["files"][1].get("thumbnail").is_none());

        let back: Directory = serde_json::from_value(json).unwrap();
        assert_eq!(back, dir);
    }

    #[test]
    fn test_thumbnail_reference_includes_directory() {
        let dir = Directory::from_listing(Listing {
            path: "/pics/2024".to_string(),
            directories: vec![],
            objects: vec![object("cat.jpg", 10)],
        });
        assert_eq!(
            dir.files[0].thumbnail.as_deref(),
            Some("thumbnails/abc123/pics/2024/cat.jpg")
        );
    }

    #[test]
    fn test_text_rendering() {
        let dir = Directory::from_listing(Listing {
            path: "/docs".to_string(),
            directories: vec!["sub".to_string()],
            objects: vec![object("a.txt", 5)],
        });
        assert_eq!(dir.to_text(), "/docs:\nsub/\na.txt (5 Byte)\n");
    }
}
